//! Storage-class files.
//!
//! ```toml
//! service_type = "nfs_treeq"
//!
//! [parameters]
//! pool_name = "pool-a"
//! nfs_networkspace = "nas"
//! max_filesystem_size = "4tib"
//! nfs_export_permissions = "[{'access':'RW','client':'*','no_root_squash':true}]"
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Parsed storage-class file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageClass {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_service_type() -> String {
    "nfs_treeq".to_string()
}

impl StorageClass {
    /// Load a storage class from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Apply `key=value` overrides on top of the file's parameters.
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for entry in overrides {
            let Some((key, value)) = entry.split_once('=') else {
                bail!("parameter override {entry:?} is not key=value");
            };
            self.parameters.insert(key.trim().to_string(), value.to_string());
        }
        Ok(())
    }
}

impl Default for StorageClass {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            parameters: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[parameters]
pool_name = "pool-a"
nfs_networkspace = "nas"
"#
        )
        .unwrap();

        let class = StorageClass::load(file.path()).unwrap();
        assert_eq!(class.service_type, "nfs_treeq");
        assert_eq!(class.parameters["pool_name"], "pool-a");
        assert_eq!(class.parameters.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let mut class = StorageClass::default();
        class
            .apply_overrides(&["pool_name=pool-b".into(), "fs_prefix=/csi=x".into()])
            .unwrap();
        assert_eq!(class.parameters["pool_name"], "pool-b");
        assert_eq!(class.parameters["fs_prefix"], "/csi=x");

        assert!(class.apply_overrides(&["no-equals".into()]).is_err());
    }

    #[test]
    fn test_rejects_non_string_parameters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[parameters]\nmax_filesystems = 3").unwrap();
        assert!(StorageClass::load(file.path()).is_err());
    }
}
