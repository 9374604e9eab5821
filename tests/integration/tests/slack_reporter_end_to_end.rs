use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tau_slack_reporter::{
    dispatch_run_event, RunEvent, RunnerStats, SlackReporter, SlackReporterConfig, SuiteStats,
    TestError, TestRunReporter, TestStats,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn runner(duration_ms: u64) -> RunnerStats {
    RunnerStats {
        cid: "0-0".to_string(),
        framework: Some("mocha".to_string()),
        capabilities: json!({"browserName": "chrome", "browserVersion": "126", "platformName": "linux"}),
        multiremote: false,
        duration_ms,
    }
}

fn suite() -> SuiteStats {
    SuiteStats {
        uid: "suite-1".to_string(),
        title: "Checkout".to_string(),
        ..SuiteStats::default()
    }
}

fn test(uid: &str, title: &str) -> TestStats {
    TestStats {
        uid: uid.to_string(),
        title: title.to_string(),
        parent: "Checkout".to_string(),
        parent_uid: Some("suite-1".to_string()),
        ..TestStats::default()
    }
}

fn run_one_pass_one_fail(reporter: &mut SlackReporter) -> anyhow::Result<()> {
    reporter.on_runner_start(&runner(0))?;
    reporter.on_suite_start(&suite())?;
    reporter.on_test_pass(&test("t-1", "adds item to cart"))?;
    let mut failing = test("t-2", "pays with card");
    failing.errors = vec![TestError::new("boom").with_stack("Error: boom\n  at x")];
    reporter.on_test_fail(&failing)?;
    reporter.on_suite_end(&suite())?;
    reporter.on_runner_end(&runner(1_500))
}

#[tokio::test]
async fn integration_channel_run_posts_start_failure_and_summary_in_one_thread() {
    init_tracing();
    let server = MockServer::start();
    let top_level = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .header("authorization", "Bearer xoxb-it")
            .body_excludes("thread_ts");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "C-IT", "ts": "100.1"}));
    });
    let replies = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("\"thread_ts\":\"100.1\"");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "C-IT", "ts": "100.2"}));
    });

    let config = SlackReporterConfig::from_json_str(
        &json!({
            "slack_options": {
                "type": "web-api",
                "token": "xoxb-it",
                "channel": "C-IT",
                "api_base": server.url(""),
                "notify_detail_result_thread": false
            },
            "title": "Nightly checkout",
            "retry_base_delay_ms": 1
        })
        .to_string(),
    )
    .expect("config parses");
    let mut reporter = SlackReporter::new(&config).expect("reporter starts");

    run_one_pass_one_fail(&mut reporter).expect("lifecycle succeeds");
    reporter
        .flush_with_timeout(FLUSH_TIMEOUT)
        .await
        .expect("notifications flushed");

    top_level.assert_calls(1);
    replies.assert_calls(2);
    assert!(reporter.is_ended());
    assert!(reporter.is_synchronised());
    let anchor = reporter.thread_anchor();
    assert_eq!(anchor.first.as_deref(), Some("100.1"));
    assert_eq!(anchor.current.as_deref(), Some("100.1"));
    assert_eq!(reporter.counts().failed, 1);
    assert_eq!(reporter.counts().passed, 1);
}

#[tokio::test]
async fn integration_channel_run_summary_reports_counts() {
    init_tracing();
    let server = MockServer::start();
    let summary = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("Failed: 1")
            .body_includes("Passed: 1");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "C-IT", "ts": "200.9"}));
    });
    let other = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_excludes("Failed: 1");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "C-IT", "ts": "200.1"}));
    });

    let mut options = tau_slack_reporter::WebApiOptions::new("xoxb-it", "C-IT");
    options.api_base = server.url("");
    options.notify_detail_result_thread = false;
    let mut config =
        SlackReporterConfig::new(tau_slack_reporter::SlackTransportConfig::WebApi(options));
    config.retry_base_delay_ms = 1;
    let mut reporter = SlackReporter::new(&config).expect("reporter starts");

    run_one_pass_one_fail(&mut reporter).expect("lifecycle succeeds");
    reporter
        .flush_with_timeout(FLUSH_TIMEOUT)
        .await
        .expect("notifications flushed");

    summary.assert_calls(1);
    other.assert_calls(2);
}

#[tokio::test]
async fn integration_webhook_run_sends_three_messages_and_never_uploads() {
    init_tracing();
    let server = MockServer::start();
    let webhook = server.mock(|when, then| {
        when.method(POST).path("/services/T/B/X");
        then.status(200).body("ok");
    });
    let upload = server.mock(|when, then| {
        when.path("/files.getUploadURLExternal");
        then.status(200).json_body(json!({"ok": true}));
    });

    let mut options = tau_slack_reporter::WebhookOptions::new(server.url("/services/T/B/X"));
    options.username = Some("QA Bot".to_string());
    let mut config =
        SlackReporterConfig::new(tau_slack_reporter::SlackTransportConfig::Webhook(options));
    config.retry_base_delay_ms = 1;
    let mut reporter = SlackReporter::new(&config).expect("reporter starts");
    let handle = reporter.handle();

    assert!(!handle.submit_screenshot(vec![0x89, 0x50, 0x4e, 0x47]));
    run_one_pass_one_fail(&mut reporter).expect("lifecycle succeeds");
    reporter
        .flush_with_timeout(FLUSH_TIMEOUT)
        .await
        .expect("notifications flushed");

    webhook.assert_calls(3);
    upload.assert_calls(0);
    assert!(reporter.is_ended());
}

#[tokio::test]
async fn regression_serialized_events_drive_the_reporter_like_direct_calls() {
    init_tracing();
    let server = MockServer::start();
    let webhook = server.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200).body("ok");
    });

    let mut config = SlackReporterConfig::new(tau_slack_reporter::SlackTransportConfig::Webhook(
        tau_slack_reporter::WebhookOptions::new(server.url("/hook")),
    ));
    config.notify_test_start_message = false;
    config.retry_base_delay_ms = 1;
    let mut reporter = SlackReporter::new(&config).expect("reporter starts");

    let events: Vec<RunEvent> = serde_json::from_value(json!([
        {"event": "runner_start", "stats": {"cid": "0-0", "framework": "mocha"}},
        {"event": "suite_start", "stats": {"uid": "s", "title": "Login"}},
        {"event": "test_pass", "stats": {"uid": "t", "title": "accepts valid password", "parent": "Login"}},
        {"event": "suite_end", "stats": {"uid": "s", "title": "Login"}},
        {"event": "runner_end", "stats": {"cid": "0-0", "framework": "mocha", "duration_ms": 250}}
    ]))
    .expect("events decode");
    for event in &events {
        dispatch_run_event(&mut reporter, event).expect("event dispatched");
    }
    reporter
        .flush_with_timeout(FLUSH_TIMEOUT)
        .await
        .expect("notifications flushed");

    webhook.assert_calls(1);
    assert_eq!(reporter.counts().passed, 1);
}
