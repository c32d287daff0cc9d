//! In-memory storage backend.
//!
//! Used for testing and for CLI dry runs. Behaves like a small storage
//! array: pools, paginated filesystem listings, exports, treeqs and object
//! metadata. Deletions that would orphan dependants are rejected, so a
//! rollback performed in the wrong order fails loudly.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumString};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ops::StorageApi;
use crate::api::types::{
    CreateExport, CreateFileSystem, CreateTreeq, Export, ExportId, FileSystem, FileSystemId,
    FileSystemPage, FileSystemPatch, Metadata, PageInfo, PoolId, Treeq, TreeqId,
};

const DEFAULT_PAGE_SIZE: usize = 50;

/// Backend operation name, used for the call log and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ApiOp {
    StoragePoolIdByName,
    FilesystemsByPool,
    FilesystemTreeqCount,
    ExportsByFilesystem,
    FilesystemCount,
    NetworkSpaceIp,
    CreateFilesystem,
    DeleteFilesystem,
    ExportFilesystem,
    DeleteExport,
    CreateTreeq,
    DeleteTreeq,
    AttachMetadata,
    UpdateFilesystem,
}

impl ApiOp {
    /// Returns true if the operation changes backend state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ApiOp::CreateFilesystem
                | ApiOp::DeleteFilesystem
                | ApiOp::ExportFilesystem
                | ApiOp::DeleteExport
                | ApiOp::CreateTreeq
                | ApiOp::DeleteTreeq
                | ApiOp::AttachMetadata
                | ApiOp::UpdateFilesystem
        )
    }
}

/// Injected failure for one operation.
#[derive(Debug, Clone, Copy)]
struct Fault {
    /// Calls allowed to succeed before the fault triggers.
    remaining_ok: usize,
    panic: bool,
}

/// Serializable backend contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Pool name → pool id.
    #[serde(default)]
    pub pools: BTreeMap<String, PoolId>,
    /// Network space name → mount address.
    #[serde(default)]
    pub network_spaces: BTreeMap<String, String>,
    /// Filesystems in listing order.
    #[serde(default)]
    pub filesystems: Vec<FileSystem>,
    #[serde(default)]
    pub exports: Vec<Export>,
    #[serde(default)]
    pub treeqs: Vec<Treeq>,
    /// Object id → metadata.
    #[serde(default)]
    pub metadata: BTreeMap<i64, Metadata>,
}

impl Inventory {
    /// Add a pool.
    pub fn with_pool(mut self, name: impl Into<String>, id: i64) -> Self {
        self.pools.insert(name.into(), PoolId(id));
        self
    }

    /// Add a network space.
    pub fn with_network_space(mut self, name: impl Into<String>, ip: impl Into<String>) -> Self {
        self.network_spaces.insert(name.into(), ip.into());
        self
    }

    /// Add a filesystem with an export at `/<name>`.
    pub fn with_filesystem(mut self, id: i64, name: &str, pool_id: i64, size: u64) -> Self {
        let filesystem_id = FileSystemId(id);
        self.filesystems.push(FileSystem {
            id: filesystem_id,
            name: name.to_string(),
            pool_id: PoolId(pool_id),
            size,
        });
        self.exports.push(Export {
            id: ExportId(id + 10_000),
            filesystem_id,
            export_path: format!("/{name}"),
            permissions: Vec::new(),
        });
        self
    }

    /// Add `count` placeholder treeqs to a filesystem.
    pub fn with_treeqs(mut self, filesystem_id: i64, count: i64) -> Self {
        let base = self.treeqs.iter().map(|t| t.id.0).max().unwrap_or(0);
        for n in 0..count {
            self.treeqs.push(Treeq {
                id: TreeqId(base + n + 1),
                filesystem_id: FileSystemId(filesystem_id),
                name: format!("seed-{filesystem_id}-{n}"),
                path: format!("/seed-{filesystem_id}-{n}"),
                hard_capacity: 0,
                mode: "750".to_string(),
            });
        }
        self
    }

    /// Metadata value stored on an object.
    pub fn metadata_value(&self, object_id: i64, key: &str) -> Option<&JsonValue> {
        self.metadata.get(&object_id).and_then(|m| m.get(key))
    }

    fn next_id(&self) -> i64 {
        let fs = self.filesystems.iter().map(|f| f.id.0);
        let ex = self.exports.iter().map(|e| e.id.0);
        let tq = self.treeqs.iter().map(|t| t.id.0);
        let pools = self.pools.values().map(|p| p.0);
        fs.chain(ex).chain(tq).chain(pools).max().unwrap_or(0) + 1
    }
}

/// In-memory storage backend.
///
/// Thread-safe via internal `Mutex`. All state is lost when dropped.
#[derive(Debug)]
pub struct MemoryApi {
    inventory: Mutex<Inventory>,
    calls: Mutex<Vec<ApiOp>>,
    filesystem_requests: Mutex<Vec<CreateFileSystem>>,
    faults: Mutex<HashMap<ApiOp, Fault>>,
    page_size: usize,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new(Inventory::default())
    }
}

impl MemoryApi {
    /// Create a backend holding `inventory`.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            calls: Mutex::new(Vec::new()),
            filesystem_requests: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of filesystems per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every call of `op` fail.
    pub fn fail_on(&self, op: ApiOp) {
        self.fail_after(op, 0);
    }

    /// Let the first `ok_calls` calls of `op` succeed, fail every later one.
    pub fn fail_after(&self, op: ApiOp, ok_calls: usize) {
        self.faults.lock().insert(
            op,
            Fault {
                remaining_ok: ok_calls,
                panic: false,
            },
        );
    }

    /// Make every call of `op` panic.
    pub fn panic_on(&self, op: ApiOp) {
        self.faults.lock().insert(
            op,
            Fault {
                remaining_ok: 0,
                panic: true,
            },
        );
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Operations issued so far, in order.
    pub fn calls(&self) -> Vec<ApiOp> {
        self.calls.lock().clone()
    }

    /// Mutating operations issued so far, in order.
    pub fn mutations(&self) -> Vec<ApiOp> {
        self.calls.lock().iter().copied().filter(ApiOp::is_mutation).collect()
    }

    /// Filesystem creation requests received so far, in order.
    pub fn filesystem_requests(&self) -> Vec<CreateFileSystem> {
        self.filesystem_requests.lock().clone()
    }

    /// Number of times `op` was issued.
    pub fn count(&self, op: ApiOp) -> usize {
        self.calls.lock().iter().filter(|c| **c == op).count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Copy of the current backend contents.
    pub fn snapshot(&self) -> Inventory {
        self.inventory.lock().clone()
    }

    /// Record a call and apply any injected fault.
    fn enter(&self, op: ApiOp) -> ApiResult<()> {
        self.calls.lock().push(op);
        let mut faults = self.faults.lock();
        let Some(fault) = faults.get_mut(&op) else {
            return Ok(());
        };
        if fault.remaining_ok > 0 {
            fault.remaining_ok -= 1;
            return Ok(());
        }
        let panic = fault.panic;
        drop(faults);
        if panic {
            panic!("injected panic in {op}");
        }
        Err(ApiError::transport(format!("injected failure in {op}")))
    }
}

#[async_trait]
impl StorageApi for MemoryApi {
    async fn storage_pool_id_by_name(&self, name: &str) -> ApiResult<PoolId> {
        self.enter(ApiOp::StoragePoolIdByName)?;
        self.inventory
            .lock()
            .pools
            .get(name)
            .copied()
            .ok_or_else(|| ApiError::not_found(format!("pool {name}")))
    }

    async fn filesystems_by_pool(&self, pool_id: PoolId, page: u32) -> ApiResult<FileSystemPage> {
        self.enter(ApiOp::FilesystemsByPool)?;
        if page == 0 {
            return Err(ApiError::rejected("pages are 1-based"));
        }
        let inventory = self.inventory.lock();
        let in_pool: Vec<&FileSystem> = inventory
            .filesystems
            .iter()
            .filter(|f| f.pool_id == pool_id)
            .collect();
        let pages_total = in_pool.len().div_ceil(self.page_size).max(1) as u32;
        let items = in_pool
            .into_iter()
            .skip((page as usize - 1) * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect();
        Ok(FileSystemPage {
            items,
            page_info: PageInfo { page, pages_total },
        })
    }

    async fn filesystem_treeq_count(&self, filesystem_id: FileSystemId) -> ApiResult<u64> {
        self.enter(ApiOp::FilesystemTreeqCount)?;
        let inventory = self.inventory.lock();
        if !inventory.filesystems.iter().any(|f| f.id == filesystem_id) {
            return Err(ApiError::not_found(format!("filesystem {filesystem_id}")));
        }
        Ok(inventory
            .treeqs
            .iter()
            .filter(|t| t.filesystem_id == filesystem_id)
            .count() as u64)
    }

    async fn exports_by_filesystem(&self, filesystem_id: FileSystemId) -> ApiResult<Vec<Export>> {
        self.enter(ApiOp::ExportsByFilesystem)?;
        Ok(self
            .inventory
            .lock()
            .exports
            .iter()
            .filter(|e| e.filesystem_id == filesystem_id)
            .cloned()
            .collect())
    }

    async fn filesystem_count(&self) -> ApiResult<u64> {
        self.enter(ApiOp::FilesystemCount)?;
        Ok(self.inventory.lock().filesystems.len() as u64)
    }

    async fn network_space_ip(&self, name: &str) -> ApiResult<String> {
        self.enter(ApiOp::NetworkSpaceIp)?;
        self.inventory
            .lock()
            .network_spaces
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("network space {name}")))
    }

    async fn create_filesystem(&self, request: &CreateFileSystem) -> ApiResult<FileSystem> {
        self.enter(ApiOp::CreateFilesystem)?;
        self.filesystem_requests.lock().push(request.clone());
        let mut inventory = self.inventory.lock();
        if !inventory.pools.values().any(|p| *p == request.pool_id) {
            return Err(ApiError::not_found(format!("pool {}", request.pool_id)));
        }
        if inventory.filesystems.iter().any(|f| f.name == request.name) {
            return Err(ApiError::already_exists(format!("filesystem {}", request.name)));
        }
        let filesystem = FileSystem {
            id: FileSystemId(inventory.next_id()),
            name: request.name.clone(),
            pool_id: request.pool_id,
            size: request.size,
        };
        inventory.filesystems.push(filesystem.clone());
        Ok(filesystem)
    }

    async fn delete_filesystem(&self, filesystem_id: FileSystemId) -> ApiResult<()> {
        self.enter(ApiOp::DeleteFilesystem)?;
        let mut inventory = self.inventory.lock();
        let index = inventory
            .filesystems
            .iter()
            .position(|f| f.id == filesystem_id)
            .ok_or_else(|| ApiError::not_found(format!("filesystem {filesystem_id}")))?;
        if inventory.exports.iter().any(|e| e.filesystem_id == filesystem_id) {
            return Err(ApiError::rejected(format!(
                "filesystem {filesystem_id} is still exported"
            )));
        }
        if inventory.treeqs.iter().any(|t| t.filesystem_id == filesystem_id) {
            return Err(ApiError::rejected(format!(
                "filesystem {filesystem_id} still holds treeqs"
            )));
        }
        inventory.filesystems.remove(index);
        inventory.metadata.remove(&filesystem_id.0);
        Ok(())
    }

    async fn export_filesystem(&self, request: &CreateExport) -> ApiResult<Export> {
        self.enter(ApiOp::ExportFilesystem)?;
        let mut inventory = self.inventory.lock();
        let name = inventory
            .filesystems
            .iter()
            .find(|f| f.id == request.filesystem_id)
            .map(|f| f.name.clone())
            .ok_or_else(|| ApiError::not_found(format!("filesystem {}", request.filesystem_id)))?;
        let requested = request.export_path.clone().unwrap_or(name);
        let export_path = if requested.starts_with('/') {
            requested
        } else {
            format!("/{requested}")
        };
        if inventory.exports.iter().any(|e| e.export_path == export_path) {
            return Err(ApiError::already_exists(format!("export {export_path}")));
        }
        let export = Export {
            id: ExportId(inventory.next_id()),
            filesystem_id: request.filesystem_id,
            export_path,
            permissions: request.permissions.clone(),
        };
        inventory.exports.push(export.clone());
        Ok(export)
    }

    async fn delete_export(&self, export_id: ExportId) -> ApiResult<()> {
        self.enter(ApiOp::DeleteExport)?;
        let mut inventory = self.inventory.lock();
        let index = inventory
            .exports
            .iter()
            .position(|e| e.id == export_id)
            .ok_or_else(|| ApiError::not_found(format!("export {export_id}")))?;
        inventory.exports.remove(index);
        Ok(())
    }

    async fn create_treeq(
        &self,
        filesystem_id: FileSystemId,
        request: &CreateTreeq,
    ) -> ApiResult<Treeq> {
        self.enter(ApiOp::CreateTreeq)?;
        let mut inventory = self.inventory.lock();
        if !inventory.filesystems.iter().any(|f| f.id == filesystem_id) {
            return Err(ApiError::not_found(format!("filesystem {filesystem_id}")));
        }
        if inventory
            .treeqs
            .iter()
            .any(|t| t.filesystem_id == filesystem_id && t.name == request.name)
        {
            return Err(ApiError::already_exists(format!("treeq {}", request.name)));
        }
        let treeq = Treeq {
            id: TreeqId(inventory.next_id()),
            filesystem_id,
            name: request.name.clone(),
            path: request.path.clone(),
            hard_capacity: request.hard_capacity,
            mode: request.mode.clone(),
        };
        inventory.treeqs.push(treeq.clone());
        Ok(treeq)
    }

    async fn delete_treeq(&self, filesystem_id: FileSystemId, treeq_id: TreeqId) -> ApiResult<()> {
        self.enter(ApiOp::DeleteTreeq)?;
        let mut inventory = self.inventory.lock();
        let index = inventory
            .treeqs
            .iter()
            .position(|t| t.filesystem_id == filesystem_id && t.id == treeq_id)
            .ok_or_else(|| ApiError::not_found(format!("treeq {treeq_id}")))?;
        inventory.treeqs.remove(index);
        Ok(())
    }

    async fn attach_metadata(&self, object_id: i64, metadata: &Metadata) -> ApiResult<()> {
        self.enter(ApiOp::AttachMetadata)?;
        let mut inventory = self.inventory.lock();
        if !inventory.filesystems.iter().any(|f| f.id.0 == object_id) {
            return Err(ApiError::not_found(format!("object {object_id}")));
        }
        let entry = inventory.metadata.entry(object_id).or_default();
        for (key, value) in metadata {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn update_filesystem(
        &self,
        filesystem_id: FileSystemId,
        patch: &FileSystemPatch,
    ) -> ApiResult<FileSystem> {
        self.enter(ApiOp::UpdateFilesystem)?;
        let mut inventory = self.inventory.lock();
        let filesystem = inventory
            .filesystems
            .iter_mut()
            .find(|f| f.id == filesystem_id)
            .ok_or_else(|| ApiError::not_found(format!("filesystem {filesystem_id}")))?;
        if let Some(size) = patch.size {
            filesystem.size = size;
        }
        Ok(filesystem.clone())
    }
}
