//! Filesystem creation.

use tracing::{debug, error, info};

use crate::api::{CreateFileSystem, FileSystemId, Metadata, PoolId, StorageApi};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, TreeqResult};

/// Metadata key naming the volume a filesystem was created for.
pub const PV_NAME_KEY: &str = "host.k8s.pvname";
/// Metadata key recording the filesystem type; always written empty.
pub const FILESYSTEM_TYPE_KEY: &str = "filesystem_type";

/// Create a new filesystem named `name` in `pool_id`.
///
/// Refuses without touching the backend once the system-wide filesystem
/// count has reached `max_filesystems`.
pub async fn create_filesystem(
    api: &dyn StorageApi,
    config: &ProvisionConfig,
    pool_id: PoolId,
    name: &str,
    capacity: u64,
) -> TreeqResult<FileSystemId> {
    let current = api
        .filesystem_count()
        .await
        .map_err(|e| ProvisionError::query("filesystem count", e))?;
    let max = config.max_filesystems();
    if current >= max {
        error!(current, max, "backend filesystem limit reached");
        return Err(ProvisionError::FilesystemQuotaExceeded { current, max });
    }

    let request = CreateFileSystem {
        pool_id,
        name: name.to_string(),
        ssd_enabled: config.ssd_enabled(),
        provtype: config.provision_type(),
        size: capacity,
    };
    debug!(?request, "creating filesystem");
    let filesystem = api.create_filesystem(&request).await.map_err(|source| {
        ProvisionError::FilesystemCreateFailed {
            name: name.to_string(),
            source,
        }
    })?;
    info!(filesystem = %filesystem.id, name, capacity, "filesystem created");
    Ok(filesystem.id)
}

/// Metadata written onto a filesystem created for `volume_name`.
pub fn ownership_metadata(volume_name: &str) -> Metadata {
    Metadata::from([
        (PV_NAME_KEY.to_string(), volume_name.into()),
        (FILESYSTEM_TYPE_KEY.to_string(), "".into()),
    ])
}
