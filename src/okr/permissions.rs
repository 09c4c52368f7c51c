use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Mirrors `okrs/permissions.yml`. Write rules name policies, not agents:
/// `owner_id_match` lets an agent modify entries it owns,
/// `delegated_explicitly` consults the delegation table.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct PermissionConfig {
    #[serde(default)]
    pub permissions: PermissionRules,
    /// owner_id -> agent ids allowed to write on the owner's behalf.
    #[serde(default)]
    pub delegations: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct PermissionRules {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

impl PermissionConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("read permissions file: {err}"))?;
        serde_yaml::from_str(&raw).map_err(|err| format!("parse permissions file: {err}"))
    }

    pub fn can_propose(&self, agent_id: &str, target_owner_id: &str) -> bool {
        let agent_id = agent_id.trim();
        let target_owner_id = target_owner_id.trim();
        if agent_id.is_empty() || target_owner_id.is_empty() {
            return false;
        }

        let write_rule = |rule: &str| {
            self.permissions
                .write
                .iter()
                .any(|entry| entry.trim() == rule)
        };

        if write_rule("owner_id_match") && agent_id == target_owner_id {
            return true;
        }
        if write_rule("delegated_explicitly") && self.is_delegated(agent_id, target_owner_id) {
            return true;
        }
        false
    }

    fn is_delegated(&self, agent_id: &str, owner_id: &str) -> bool {
        self.delegations
            .get(owner_id)
            .map(|agents| agents.iter().any(|candidate| candidate.trim() == agent_id))
            .unwrap_or(false)
    }
}

/// Loads `permissions.yml` from a directory, or an empty (deny-all) config
/// when the file is absent.
pub fn load_permissions_for_dir(dir: &Path) -> Result<PermissionConfig, String> {
    let path = dir.join(super::load::PERMISSIONS_FILE_NAME);
    if !path.exists() {
        return Ok(PermissionConfig::default());
    }
    PermissionConfig::load(&path)
}
