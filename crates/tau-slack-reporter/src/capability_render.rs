//! Renders resolved WebDriver capabilities as a short environment line.

use std::path::Path;

use serde_json::{Map, Value};

/// `*Driver*: <env>` for a single session, or a `*MultiRemote*:` header with
/// one `- *<name>*: <env>` line per driver.
pub fn render_environment(capabilities: &Value, multiremote: bool) -> String {
    let capabilities = unwrap_always_match(capabilities);
    if !multiremote {
        return format!("*Driver*: {}", describe_driver(capabilities));
    }

    let mut lines = vec!["*MultiRemote*: ".to_string()];
    if let Some(drivers) = capabilities.as_object() {
        for (name, driver) in drivers {
            lines.push(format!("- *{name}*: {}", describe_driver(driver)));
        }
    }
    lines.join("\n")
}

fn unwrap_always_match(capabilities: &Value) -> &Value {
    capabilities.get("alwaysMatch").unwrap_or(capabilities)
}

fn text<'a>(caps: &'a Value, key: &str) -> Option<&'a str> {
    caps.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn first_text<'a>(caps: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| text(caps, key))
}

fn describe_driver(raw: &Value) -> String {
    let empty = Value::Object(Map::new());
    let raw = if raw.is_object() { raw } else { &empty };
    let caps = unwrap_always_match(raw);

    let app = first_text(raw, &["appium:app", "app"])
        .unwrap_or_default()
        .replace("sauce-storage:", "");
    let app_name = first_text(caps, &["appium:bundleId", "appium:appPackage", "appium:appActivity"])
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            let path = Path::new(&app);
            if path.is_absolute() {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                app.clone()
            }
        });
    let app_name = Some(app_name).filter(|name| !name.is_empty());

    let browser = first_text(raw, &["browserName", "browser"])
        .map(ToOwned::to_owned)
        .or_else(|| app_name.clone())
        .unwrap_or_default();
    let version = first_text(
        caps,
        &["browserVersion", "version", "appium:platformVersion", "browser_version"],
    );
    let platform = first_text(caps, &["platformName", "platform"])
        .map(ToOwned::to_owned)
        .or_else(|| {
            text(caps, "os").map(|os| match text(caps, "os_version") {
                Some(os_version) => format!("{os} {os_version}"),
                None => os.to_string(),
            })
        })
        .unwrap_or_else(|| "(unknown)".to_string());

    if let Some(device) = text(caps, "appium:deviceName") {
        let program = app_name.or_else(|| text(caps, "browserName").map(ToOwned::to_owned));
        let executing = program
            .map(|program| format!("executing {program}"))
            .unwrap_or_default();
        return format!("{device} on {platform} {} {executing}", version.unwrap_or_default())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
    }

    match version {
        Some(version) => format!("{browser} (v{version}) on {platform}"),
        None => format!("{browser} on {platform}"),
    }
}
