//! Filesystem placement.
//!
//! First-fit search over a pool's filesystems: the first one, in listing
//! order, with room for both the requested bytes and one more treeq wins.

use tracing::{debug, info};

use crate::api::{FileSystem, PoolId, StorageApi};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, TreeqResult};

/// An existing filesystem selected to host a new treeq.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemCandidate {
    pub filesystem: FileSystem,
    /// Treeq count observed at selection time.
    pub treeq_count: u64,
    /// Path the filesystem is exported under.
    pub export_path: String,
}

/// Outcome of a placement search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub pool_id: PoolId,
    /// `None` means a new filesystem is needed.
    pub candidate: Option<FilesystemCandidate>,
}

/// Find an existing filesystem in `pool_name` that can take `requested` bytes.
pub async fn find_candidate(
    api: &dyn StorageApi,
    config: &ProvisionConfig,
    pool_name: &str,
    requested: u64,
) -> TreeqResult<Placement> {
    let pool_id = api
        .storage_pool_id_by_name(pool_name)
        .await
        .map_err(|source| ProvisionError::PoolNotFound {
            name: pool_name.to_string(),
            source,
        })?;
    let max_size = config.max_filesystem_bytes()?;
    let max_treeqs = config.max_treeqs_per_filesystem();

    let mut page = 1;
    loop {
        let listing = api
            .filesystems_by_pool(pool_id, page)
            .await
            .map_err(|e| {
                ProvisionError::query(format!("list filesystems of pool {pool_name} page {page}"), e)
            })?;
        if listing.items.is_empty() {
            debug!(pool = %pool_id, page, "empty filesystem page");
            break;
        }

        for filesystem in listing.items {
            if filesystem.size.saturating_add(requested) >= max_size {
                continue;
            }
            let treeq_count = api
                .filesystem_treeq_count(filesystem.id)
                .await
                .map_err(|e| {
                    ProvisionError::query(format!("treeq count of filesystem {}", filesystem.id), e)
                })?;
            if treeq_count >= max_treeqs {
                continue;
            }

            let export_path = export_path_of(api, &filesystem).await?;
            info!(
                filesystem = %filesystem.id,
                size = filesystem.size,
                treeq_count,
                export_path = %export_path,
                "selected existing filesystem"
            );
            return Ok(Placement {
                pool_id,
                candidate: Some(FilesystemCandidate {
                    filesystem,
                    treeq_count,
                    export_path,
                }),
            });
        }

        if listing.page_info.is_last() {
            break;
        }
        page += 1;
    }

    debug!(pool = %pool_id, requested, "no filesystem can host the treeq");
    Ok(Placement {
        pool_id,
        candidate: None,
    })
}

/// First export path of a filesystem. A reused filesystem must be exported.
async fn export_path_of(api: &dyn StorageApi, filesystem: &FileSystem) -> TreeqResult<String> {
    let exports = api
        .exports_by_filesystem(filesystem.id)
        .await
        .map_err(|e| ProvisionError::query(format!("exports of filesystem {}", filesystem.id), e))?;
    exports
        .into_iter()
        .next()
        .map(|export| export.export_path)
        .ok_or_else(|| {
            ProvisionError::query(
                format!("exports of filesystem {}", filesystem.id),
                crate::api::ApiError::not_found(format!("export for filesystem {}", filesystem.id)),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiOp, FileSystemId, Inventory, MemoryApi};
    use crate::config::{MAX_FILESYSTEM_SIZE, MAX_TREEQS_PER_FILESYSTEM};
    use crate::units::GIB;

    fn limits(max_size: &str, max_treeqs: &str) -> ProvisionConfig {
        [
            (MAX_FILESYSTEM_SIZE, max_size),
            (MAX_TREEQS_PER_FILESYSTEM, max_treeqs),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_first_fit_skips_full_treeq_count() {
        // fs 1 fits by size but is out of treeq headroom; fs 2 fits both.
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 80 * GIB)
                .with_filesystem(2, "fs-2", 1, 85 * GIB)
                .with_filesystem(3, "fs-3", 1, GIB)
                .with_treeqs(1, 999)
                .with_treeqs(2, 5),
        );
        let placement = find_candidate(&api, &limits("100gib", "999"), "pool-a", 10 * GIB)
            .await
            .unwrap();
        let candidate = placement.candidate.unwrap();
        // fs-3 is the better fit; first-fit still picks fs-2.
        assert_eq!(candidate.filesystem.id, FileSystemId(2));
        assert_eq!(candidate.treeq_count, 5);
        assert_eq!(candidate.export_path, "/fs-2");
        assert_eq!(placement.pool_id, PoolId(1));
    }

    #[tokio::test]
    async fn test_size_check_is_strict() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 90 * GIB),
        );
        let placement = find_candidate(&api, &limits("100gib", "1000"), "pool-a", 10 * GIB)
            .await
            .unwrap();
        assert_eq!(placement.candidate, None);
        // Size rejection does not cost a treeq-count call.
        assert_eq!(api.count(ApiOp::FilesystemTreeqCount), 0);
    }

    #[tokio::test]
    async fn test_searches_later_pages() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 99 * GIB)
                .with_filesystem(2, "fs-2", 1, 99 * GIB)
                .with_filesystem(3, "fs-3", 1, GIB),
        )
        .with_page_size(1);
        let placement = find_candidate(&api, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap();
        assert_eq!(placement.candidate.unwrap().filesystem.id, FileSystemId(3));
        assert_eq!(api.count(ApiOp::FilesystemsByPool), 3);
    }

    #[tokio::test]
    async fn test_no_candidate_is_not_an_error() {
        let empty = MemoryApi::new(Inventory::default().with_pool("pool-a", 1));
        let placement = find_candidate(&empty, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap();
        assert_eq!(placement.candidate, None);

        let full = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 100 * GIB),
        )
        .with_page_size(1);
        let placement = find_candidate(&full, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap();
        assert_eq!(placement.candidate, None);
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let api = MemoryApi::default();
        let err = find_candidate(&api, &ProvisionConfig::default(), "nope", GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PoolNotFound { ref name, .. } if name == "nope"));
    }

    #[tokio::test]
    async fn test_listing_failure_short_circuits() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 99 * GIB)
                .with_filesystem(2, "fs-2", 1, GIB),
        )
        .with_page_size(1);
        api.fail_after(ApiOp::FilesystemsByPool, 1);
        let err = find_candidate(&api, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BackendQueryFailed { .. }));
        assert_eq!(api.count(ApiOp::FilesystemsByPool), 2);
    }

    #[tokio::test]
    async fn test_treeq_count_failure() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, GIB),
        );
        api.fail_on(ApiOp::FilesystemTreeqCount);
        let err = find_candidate(&api, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BackendQueryFailed { .. }));
    }

    #[tokio::test]
    async fn test_export_lookup_failure_aborts_placement() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, GIB),
        );
        api.fail_on(ApiOp::ExportsByFilesystem);
        let err = find_candidate(&api, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BackendQueryFailed { .. }));
    }

    #[tokio::test]
    async fn test_unexported_filesystem_aborts_placement() {
        let mut inventory = Inventory::default()
            .with_pool("pool-a", 1)
            .with_filesystem(3, "fs-3", 1, GIB);
        inventory.exports.clear();
        let api = MemoryApi::new(inventory);

        let err = find_candidate(&api, &ProvisionConfig::default(), "pool-a", GIB)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::BackendQueryFailed { ref context, .. } if context == "exports of filesystem 3"
        ));
    }

    #[tokio::test]
    async fn test_bad_max_size() {
        let api = MemoryApi::new(Inventory::default().with_pool("pool-a", 1));
        let err = find_candidate(&api, &limits("lots", "1"), "pool-a", GIB)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSizeFormat(_)));
        assert_eq!(api.count(ApiOp::FilesystemsByPool), 0);
    }
}
