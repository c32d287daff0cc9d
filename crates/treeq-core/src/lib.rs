//! # treeq-core
//!
//! Provisions NFS volumes as treeqs (quota sub-trees) inside shared backend
//! filesystems.
//!
//! A provisioning call:
//! - Validates the storage-class options before touching the backend
//! - Places the volume in the first filesystem with room for it, or
//!   creates and exports a new filesystem
//! - Creates the treeq and bumps the filesystem's treeq counter
//! - Undoes every committed step, newest first, if a later one fails
//!
//! The backend itself is reached through [`StorageApi`]; [`MemoryApi`] is
//! an in-memory implementation for tests and dry runs.

pub mod api;
pub mod assembler;
pub mod compensation;
pub mod config;
pub mod error;
pub mod export;
pub mod filesystem;
pub mod placement;
pub mod service;
pub mod units;

pub use api::{ApiError, ApiOp, ApiResult, Inventory, MemoryApi, StorageApi};
pub use assembler::{ProvisionRequest, ProvisionResult, Step, TreeqAssembler, TREEQ_COUNT_KEY};
pub use compensation::{Compensation, CompensationError, CompensationLog};
pub use config::ProvisionConfig;
pub use error::{ProvisionError, TreeqResult};
pub use placement::{find_candidate, FilesystemCandidate, Placement};
pub use service::{treeq_service, ServiceType};
pub use units::{format_size, parse_size, GIB, TIB};
