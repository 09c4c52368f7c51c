use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::fs;

pub const DEFAULT_TIMEZONE: &str = "America/Chicago";
pub const DEFAULT_POLL_SECONDS: u64 = 1;
pub const DEFAULT_LEASE_SECONDS: u64 = 30;
pub const SETTINGS_FILE_NAME: &str = "okra.yml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Workspace-level daemon settings, loaded from `<workspace>/okra.yml` when
/// present. Every field has a default so an absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    #[serde(default)]
    pub lease_owner: Option<String>,
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub claim: ClaimSettings,
    #[serde(default)]
    pub notifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterSettings {
    /// `mock` or `exec`.
    #[serde(default = "default_adapter_name")]
    pub name: String,
    /// Binary for the exec adapter.
    #[serde(default)]
    pub command: Option<String>,
    /// Extra arguments passed to the exec adapter binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-item timeout in seconds; 0 means no timeout.
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClaimSettings {
    /// When true, claim_next also re-leases running jobs whose lease has
    /// expired. Off by default: stuck rows are only surfaced by inspection.
    #[serde(default)]
    pub reclaim_expired: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            poll_seconds: default_poll_seconds(),
            lease_seconds: default_lease_seconds(),
            lease_owner: None,
            adapter: AdapterSettings::default(),
            claim: ClaimSettings::default(),
            notifications: false,
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            name: default_adapter_name(),
            command: None,
            args: Vec::new(),
            timeout_seconds: 0,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid timezone `{}`; expected IANA timezone id",
                self.timezone
            )));
        }
        if self.poll_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll_seconds must be >= 1".to_string(),
            ));
        }
        if self.lease_seconds == 0 {
            return Err(ConfigError::Invalid(
                "lease_seconds must be >= 1".to_string(),
            ));
        }
        match self.adapter.name.as_str() {
            "mock" => Ok(()),
            "exec" => {
                let has_command = self
                    .adapter
                    .command
                    .as_deref()
                    .is_some_and(|cmd| !cmd.trim().is_empty());
                if !has_command {
                    return Err(ConfigError::Invalid(
                        "adapter.command is required when adapter.name is `exec`".to_string(),
                    ));
                }
                Ok(())
            }
            other => Err(ConfigError::Invalid(format!(
                "unknown adapter `{other}` (expected `mock` or `exec`)"
            ))),
        }
    }
}

/// Loads settings for a workspace, falling back to defaults when no
/// settings file exists.
pub fn load_settings(workspace: &Workspace) -> Result<Settings, ConfigError> {
    let path = workspace.root.join(SETTINGS_FILE_NAME);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let settings: Settings = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    settings.validate()?;
    Ok(settings)
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_poll_seconds() -> u64 {
    DEFAULT_POLL_SECONDS
}

fn default_lease_seconds() -> u64 {
    DEFAULT_LEASE_SECONDS
}

fn default_adapter_name() -> String {
    "mock".to_string()
}
