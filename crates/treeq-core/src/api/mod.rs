//! Storage backend abstraction.
//!
//! Key components:
//!
//! - [`StorageApi`] - Operations the provisioning core issues against the backend
//! - [`MemoryApi`] - In-memory backend (testing, dry runs)
//!
//! ## Design Decisions
//!
//! - **One call, one effect**: every mutation is independent. Multi-step
//!   consistency is the caller's job (see [`crate::compensation`]).
//! - **Typed ids**: pool, filesystem, export and treeq ids are distinct
//!   newtypes so they cannot be swapped at a call site.

mod error;
pub mod memory;
mod ops;
mod types;

pub use error::{ApiError, ApiResult};
pub use memory::{ApiOp, Inventory, MemoryApi};
pub use ops::StorageApi;
pub use types::{
    Access, CreateExport, CreateFileSystem, CreateTreeq, Export, ExportId, ExportPermission,
    FileSystem, FileSystemId, FileSystemPage, FileSystemPatch, Metadata, PageInfo, PoolId, Treeq,
    TreeqId,
};
