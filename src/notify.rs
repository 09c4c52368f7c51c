use std::process::Command;

/// Sends user-facing notifications about plan and KR progress. Delivery is
/// macOS-only (osascript); on other platforms every send is a no-op so
/// callers never need to branch on platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Notifier {
    pub enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn send(&self, title: &str, message: &str) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if !cfg!(target_os = "macos") {
            return Ok(());
        }
        send_macos_notification(title, message)
    }
}

fn send_macos_notification(title: &str, message: &str) -> Result<(), String> {
    let title = title.replace('"', "\\\"");
    let message = message.replace('"', "\\\"");
    let script = format!("display notification \"{message}\" with title \"{title}\"");
    let status = Command::new("osascript")
        .args(["-e", &script])
        .status()
        .map_err(|err| format!("send notification: {err}"))?;
    if !status.success() {
        return Err(format!("send notification: osascript exited {status}"));
    }
    Ok(())
}

/// Formats a plan completion notification.
pub fn format_plan_complete(
    kr_id: &str,
    items_total: usize,
    items_succeeded: usize,
    items_failed: usize,
) -> (String, String) {
    if items_failed > 0 {
        (
            "okra plan failed".to_string(),
            format!("{kr_id}: {items_failed}/{items_total} items failed"),
        )
    } else {
        (
            "okra plan complete".to_string(),
            format!("{kr_id}: {items_succeeded}/{items_total} items succeeded"),
        )
    }
}

/// Formats a key-result status change notification.
pub fn format_kr_status_change(
    kr_id: &str,
    description: &str,
    old_status: &str,
    new_status: &str,
    current: f64,
    target: f64,
) -> (String, String) {
    match new_status {
        "achieved" => (
            "okra KR achieved".to_string(),
            format!("{kr_id}: {description} ({current:.0}/{target:.0})"),
        ),
        "in_progress" => (
            "okra KR in progress".to_string(),
            format!("{kr_id}: {description} ({current:.0}/{target:.0})"),
        ),
        _ => (
            "okra KR status update".to_string(),
            format!("{kr_id}: {old_status} -> {new_status}"),
        ),
    }
}
