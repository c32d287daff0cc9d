//! NFS export creation and permission rules.

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::api::{Access, CreateExport, ExportId, ExportPermission, FileSystemId, StorageApi};
use crate::config::parse_bool;
use crate::error::{ProvisionError, TreeqResult};

/// Transport every export is created with.
pub const TRANSPORT_PROTOCOLS: &str = "TCP";

/// A created export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedExport {
    pub id: ExportId,
    /// Canonical path reported by the backend.
    pub path: String,
}

/// Type-check permission records.
///
/// Each record needs a string `access` (`RW` or `RO`), a string `client`,
/// and a `no_root_squash` that is either a bool or a string. Strings that do
/// not read as a bool count as `true`.
pub fn parse_permission_rules(records: &[JsonValue]) -> TreeqResult<Vec<ExportPermission>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| parse_rule(index, record))
        .collect()
}

fn parse_rule(index: usize, record: &JsonValue) -> TreeqResult<ExportPermission> {
    let invalid = |reason: String| ProvisionError::InvalidPermissionRule(format!("rule #{index}: {reason}"));

    let fields = record
        .as_object()
        .ok_or_else(|| invalid(format!("expected an object, got {record}")))?;
    let string_field = |name: &str| {
        fields
            .get(name)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid(format!("`{name}` must be a string")))
    };

    let access = string_field("access")?;
    let access: Access = access
        .parse()
        .map_err(|_| invalid(format!("unknown access {access:?}")))?;
    let client = string_field("client")?.to_string();
    let no_root_squash = match fields.get("no_root_squash") {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => parse_bool(s).unwrap_or_else(|| {
            debug!(index, value = %s, "unparsable no_root_squash, defaulting to true");
            true
        }),
        Some(other) => {
            return Err(invalid(format!(
                "`no_root_squash` must be a bool or string, got {other}"
            )));
        }
        None => return Err(invalid("`no_root_squash` is missing".to_string())),
    };

    Ok(ExportPermission {
        access,
        client,
        no_root_squash,
    })
}

/// Export `filesystem_id`.
///
/// With a prefix the export is requested at `<prefix>/<volume_name>`;
/// without one the backend picks the path.
pub async fn create_export(
    api: &dyn StorageApi,
    filesystem_id: FileSystemId,
    prefix: Option<&str>,
    volume_name: &str,
    permissions: &[ExportPermission],
) -> TreeqResult<CreatedExport> {
    let request = CreateExport {
        filesystem_id,
        export_path: prefix.map(|p| join_path(p, volume_name)),
        transport_protocols: TRANSPORT_PROTOCOLS.to_string(),
        privileged_port: true,
        permissions: permissions.to_vec(),
    };
    let export = api
        .export_filesystem(&request)
        .await
        .map_err(|source| ProvisionError::ExportCreateFailed {
            filesystem: filesystem_id,
            source,
        })?;
    info!(
        filesystem = %filesystem_id,
        export = %export.id,
        path = %export.export_path,
        "export created"
    );
    Ok(CreatedExport {
        id: export.id,
        path: export.export_path,
    })
}

/// Join two slash-separated paths, dropping empty and `.` segments.
///
/// The result is absolute when `base` is, or when `base` is empty and
/// `tail` is.
pub fn join_path(base: &str, tail: &str) -> String {
    let absolute = if base.is_empty() {
        tail.starts_with('/')
    } else {
        base.starts_with('/')
    };
    let segments: Vec<&str> = base
        .split('/')
        .chain(tail.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiOp, Inventory, MemoryApi};
    use serde_json::json;

    #[test]
    fn test_parse_rules() {
        let rules = parse_permission_rules(&[
            json!({"access": "RW", "client": "*", "no_root_squash": true}),
            json!({"access": "ro", "client": "10.0.0.0/8", "no_root_squash": "false"}),
        ])
        .unwrap();
        assert_eq!(
            rules,
            vec![
                ExportPermission {
                    access: Access::ReadWrite,
                    client: "*".into(),
                    no_root_squash: true,
                },
                ExportPermission {
                    access: Access::ReadOnly,
                    client: "10.0.0.0/8".into(),
                    no_root_squash: false,
                },
            ]
        );
    }

    #[test]
    fn test_unparsable_root_squash_string_is_true() {
        let rules = parse_permission_rules(&[json!({
            "access": "RW", "client": "*", "no_root_squash": "sometimes"
        })])
        .unwrap();
        assert!(rules[0].no_root_squash);
    }

    #[test]
    fn test_invalid_rules() {
        let cases = [
            json!("RW"),
            json!({"client": "*", "no_root_squash": true}),
            json!({"access": "RW", "no_root_squash": true}),
            json!({"access": "RW", "client": "*"}),
            json!({"access": "RW", "client": "*", "no_root_squash": 1}),
            json!({"access": "RW", "client": 7, "no_root_squash": true}),
            json!({"access": "WO", "client": "*", "no_root_squash": true}),
        ];
        for case in cases {
            let err = parse_permission_rules(&[case.clone()]).unwrap_err();
            assert!(
                matches!(err, ProvisionError::InvalidPermissionRule(ref m) if m.starts_with("rule #0")),
                "{case} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/csi", "pvc-1"), "/csi/pvc-1");
        assert_eq!(join_path("/csi/", "/pvc-1"), "/csi/pvc-1");
        assert_eq!(join_path("csi", "pvc-1"), "csi/pvc-1");
        assert_eq!(join_path("", "/pvc-1"), "/pvc-1");
        assert_eq!(join_path("/exp/./a", "b"), "/exp/a/b");
    }

    async fn api_with_filesystem() -> (MemoryApi, FileSystemId) {
        let api = MemoryApi::new(Inventory::default().with_pool("pool-a", 1));
        let fs = api
            .create_filesystem(&crate::api::CreateFileSystem {
                pool_id: crate::api::PoolId(1),
                name: "pvc-1".into(),
                ssd_enabled: false,
                provtype: "THIN".into(),
                size: 1,
            })
            .await
            .unwrap();
        (api, fs.id)
    }

    #[tokio::test]
    async fn test_create_with_prefix() {
        let (api, fs) = api_with_filesystem().await;
        let rules = vec![ExportPermission {
            access: Access::ReadWrite,
            client: "*".into(),
            no_root_squash: true,
        }];
        let export = create_export(&api, fs, Some("/csi"), "pvc-1", &rules)
            .await
            .unwrap();
        assert_eq!(export.path, "/csi/pvc-1");

        let stored = &api.snapshot().exports[0];
        assert_eq!(stored.id, export.id);
        assert_eq!(stored.permissions, rules);
    }

    #[tokio::test]
    async fn test_backend_assigns_path() {
        let (api, fs) = api_with_filesystem().await;
        let export = create_export(&api, fs, None, "pvc-1", &[]).await.unwrap();
        assert_eq!(export.path, "/pvc-1");
    }

    #[tokio::test]
    async fn test_create_failure() {
        let (api, fs) = api_with_filesystem().await;
        api.fail_on(ApiOp::ExportFilesystem);
        let err = create_export(&api, fs, None, "pvc-1", &[]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ExportCreateFailed { filesystem, .. } if filesystem == fs));
        assert!(api.snapshot().exports.is_empty());
    }
}
