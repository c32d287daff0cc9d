//! Per-request provisioning configuration.
//!
//! A [`ProvisionConfig`] wraps the flat option map handed down from the
//! storage class and answers typed questions about it. Every key with a
//! default resolves override-first; malformed overrides fall back to the
//! default instead of failing the request.

use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{ProvisionError, TreeqResult};
use crate::units::parse_size;

pub const POOL_NAME: &str = "pool_name";
pub const NETWORK_SPACE: &str = "nfs_networkspace";
pub const PROVISION_TYPE: &str = "provision_type";
pub const PV_SIZE: &str = "pv_size";
pub const MAX_TREEQS_PER_FILESYSTEM: &str = "max_treeqs_per_filesystem";
pub const MAX_FILESYSTEMS: &str = "max_filesystems";
pub const MAX_FILESYSTEM_SIZE: &str = "max_filesystem_size";
pub const FS_PREFIX: &str = "fs_prefix";
pub const UNIX_PERMISSIONS: &str = "nfs_unix_permissions";
pub const EXPORT_PERMISSIONS: &str = "nfs_export_permissions";
pub const SSD_ENABLED: &str = "ssd_enabled";

/// Keys that must be present and non-empty before provisioning starts.
pub const REQUIRED_KEYS: [&str; 2] = [POOL_NAME, NETWORK_SPACE];

const DEFAULTS: [(&str, &str); 6] = [
    (PROVISION_TYPE, "thin"),
    (PV_SIZE, "1gib"),
    (MAX_TREEQS_PER_FILESYSTEM, "1000"),
    (MAX_FILESYSTEMS, "1000"),
    (MAX_FILESYSTEM_SIZE, "100gib"),
    (UNIX_PERMISSIONS, "750"),
];

/// Built-in default for `key`, if it has one.
pub fn default_value(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Immutable view over one request's options plus the default table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionConfig {
    options: HashMap<String, String>,
}

impl From<HashMap<String, String>> for ProvisionConfig {
    fn from(options: HashMap<String, String>) -> Self {
        Self::new(options)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProvisionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl ProvisionConfig {
    pub fn new(options: HashMap<String, String>) -> Self {
        Self { options }
    }

    /// Raw option value, without defaults.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Option value, falling back to the built-in default.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| default_value(key))
    }

    /// Check that every required key is set.
    ///
    /// On failure returns one `field → "<field> value missing"` entry per
    /// missing key.
    pub fn validate(&self) -> Result<(), BTreeMap<String, String>> {
        let problems: BTreeMap<String, String> = REQUIRED_KEYS
            .iter()
            .filter(|key| self.get(key).is_none_or(str::is_empty))
            .map(|key| (key.to_string(), format!("{key} value missing")))
            .collect();
        debug!(missing = problems.len(), "parameter validation completed");
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Integer limit: a parsable override wins, anything else yields the default.
    pub fn limit(&self, key: &str) -> u64 {
        if let Some(raw) = self.get(key) {
            match raw.parse::<u64>() {
                Ok(value) => return value,
                Err(e) => {
                    debug!(key, value = raw, error = %e, "unparsable limit override, using default")
                }
            }
        }
        default_value(key)
            .and_then(|d| d.parse().ok())
            .unwrap_or_default()
    }

    pub fn max_treeqs_per_filesystem(&self) -> u64 {
        self.limit(MAX_TREEQS_PER_FILESYSTEM)
    }

    pub fn max_filesystems(&self) -> u64 {
        self.limit(MAX_FILESYSTEMS)
    }

    /// Largest size a filesystem may grow to, in bytes.
    pub fn max_filesystem_bytes(&self) -> TreeqResult<u64> {
        parse_size(self.resolve(MAX_FILESYSTEM_SIZE).unwrap_or_default())
    }

    /// Capacity used when a request does not name one, in bytes.
    pub fn default_pv_bytes(&self) -> TreeqResult<u64> {
        parse_size(self.resolve(PV_SIZE).unwrap_or_default())
    }

    /// Unix mode for new treeqs. Not validated here; the backend does that.
    pub fn permission_mode(&self) -> &str {
        self.resolve(UNIX_PERMISSIONS).unwrap_or_default()
    }

    /// Provisioning type in the backend's spelling (`THIN`, `THICK`).
    pub fn provision_type(&self) -> String {
        self.resolve(PROVISION_TYPE)
            .unwrap_or_default()
            .to_uppercase()
    }

    /// Unset or unparsable means false.
    pub fn ssd_enabled(&self) -> bool {
        self.get(SSD_ENABLED)
            .filter(|v| !v.is_empty())
            .and_then(parse_bool)
            .unwrap_or(false)
    }

    /// Directory new exports are created under, if configured.
    pub fn fs_prefix(&self) -> Option<&str> {
        self.get(FS_PREFIX).filter(|p| !p.is_empty())
    }

    pub fn pool_name(&self) -> &str {
        self.get(POOL_NAME).unwrap_or_default()
    }

    pub fn network_space(&self) -> &str {
        self.get(NETWORK_SPACE).unwrap_or_default()
    }

    /// Export permission records as written in the options.
    ///
    /// Storage classes usually quote with `'`, so single quotes are read as
    /// double quotes. An unset key means no rules.
    pub fn export_permission_records(&self) -> TreeqResult<Vec<JsonValue>> {
        let Some(raw) = self.get(EXPORT_PERMISSIONS).filter(|r| !r.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw.replace('\'', "\"")).map_err(|e| {
            ProvisionError::InvalidPermissionRule(format!(
                "{EXPORT_PERMISSIONS} is not a list of rules: {e}"
            ))
        })
    }
}

/// Boolean spellings accepted in options.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
