use super::collect::Provider;
use super::types::{as_of_timestamp, truncate_to_day, MetricPoint};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::process::Command;

/// Commit-activity metrics from `git rev-list` over the 30 days ending on
/// the as-of date.
#[derive(Debug, Clone)]
pub struct GitProvider {
    pub repo_dir: PathBuf,
    pub as_of: DateTime<Utc>,
}

impl Provider for GitProvider {
    fn name(&self) -> &str {
        "git"
    }

    fn collect(&self) -> Result<Vec<MetricPoint>, String> {
        let as_of = truncate_to_day(self.as_of);
        let until = as_of + Duration::days(1);
        let since = until - Duration::days(30);
        let since_arg = format!("--since={}", since.to_rfc3339());
        let until_arg = format!("--until={}", until.to_rfc3339());

        let commits = self.rev_list_count(&[
            "rev-list",
            "--count",
            &since_arg,
            &until_arg,
            "HEAD",
        ])?;
        let merge_commits = self.rev_list_count(&[
            "rev-list",
            "--count",
            "--merges",
            &since_arg,
            &until_arg,
            "HEAD",
        ])?;

        let ts = as_of_timestamp(as_of);
        Ok(vec![
            MetricPoint {
                key: "git.commits_30d".to_string(),
                value: commits as f64,
                unit: "count".to_string(),
                timestamp: ts.clone(),
                source: self.name().to_string(),
                evidence: Vec::new(),
                dimensions: Vec::new(),
            },
            MetricPoint {
                key: "git.merge_commits_30d".to_string(),
                value: merge_commits as f64,
                unit: "count".to_string(),
                timestamp: ts,
                source: self.name().to_string(),
                evidence: Vec::new(),
                dimensions: Vec::new(),
            },
        ])
    }
}

impl GitProvider {
    fn rev_list_count(&self, args: &[&str]) -> Result<i64, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|err| format!("git {}: {err}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                return Err(format!("git {} failed", args.join(" ")));
            }
            return Err(format!("git {}: {stderr}", args.join(" ")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw = stdout.trim();
        if raw.is_empty() {
            return Err(format!("git {} returned empty output", args.join(" ")));
        }
        raw.parse::<i64>()
            .map_err(|err| format!("parse git output `{raw}`: {err}"))
    }
}
