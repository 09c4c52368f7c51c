use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn daemon_log_path(audit_dir: &Path) -> PathBuf {
    audit_dir.join("daemon.log")
}

/// Appends a single structured line to the daemon runtime log. Best effort:
/// callers treat logging as non-fatal and ignore the returned error.
pub fn append_daemon_log(
    audit_dir: &Path,
    level: &str,
    event: &str,
    message: &str,
) -> std::io::Result<()> {
    let path = daemon_log_path(audit_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(
        file,
        "{} level={level} event={event} {message}",
        crate::shared::timefmt::format_utc_seconds(chrono::Utc::now()),
    )
}
