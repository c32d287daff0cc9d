//! Storage backend operations trait.
//!
//! This is the whole surface the provisioning core needs from the backend.
//! Implementations own transport concerns (HTTP, auth, retries, timeouts).

use async_trait::async_trait;

use super::types::{
    CreateExport, CreateFileSystem, CreateTreeq, Export, ExportId, FileSystem, FileSystemId,
    FileSystemPage, FileSystemPatch, Metadata, PoolId, Treeq, TreeqId,
};
use super::ApiResult;

/// Storage backend collaborator.
///
/// Every call is independent: the backend offers no transaction spanning
/// more than one of them.
#[async_trait]
pub trait StorageApi: Send + Sync {
    // ========================================================================
    // Queries
    // ========================================================================

    /// Resolve a storage pool name to its identifier.
    async fn storage_pool_id_by_name(&self, name: &str) -> ApiResult<PoolId>;

    /// List one page (1-based) of the filesystems in a pool.
    async fn filesystems_by_pool(&self, pool_id: PoolId, page: u32) -> ApiResult<FileSystemPage>;

    /// Number of treeqs currently inside a filesystem.
    async fn filesystem_treeq_count(&self, filesystem_id: FileSystemId) -> ApiResult<u64>;

    /// Exports bound to a filesystem.
    async fn exports_by_filesystem(&self, filesystem_id: FileSystemId) -> ApiResult<Vec<Export>>;

    /// Total number of filesystems on the backend, across all pools.
    async fn filesystem_count(&self) -> ApiResult<u64>;

    /// Resolve a network space name to the address clients mount from.
    async fn network_space_ip(&self, name: &str) -> ApiResult<String>;

    // ========================================================================
    // Mutations
    // ========================================================================

    async fn create_filesystem(&self, request: &CreateFileSystem) -> ApiResult<FileSystem>;

    async fn delete_filesystem(&self, filesystem_id: FileSystemId) -> ApiResult<()>;

    async fn export_filesystem(&self, request: &CreateExport) -> ApiResult<Export>;

    async fn delete_export(&self, export_id: ExportId) -> ApiResult<()>;

    async fn create_treeq(
        &self,
        filesystem_id: FileSystemId,
        request: &CreateTreeq,
    ) -> ApiResult<Treeq>;

    async fn delete_treeq(&self, filesystem_id: FileSystemId, treeq_id: TreeqId) -> ApiResult<()>;

    /// Attach or overwrite metadata keys on a backend object.
    async fn attach_metadata(&self, object_id: i64, metadata: &Metadata) -> ApiResult<()>;

    async fn update_filesystem(
        &self,
        filesystem_id: FileSystemId,
        patch: &FileSystemPatch,
    ) -> ApiResult<FileSystem>;
}
