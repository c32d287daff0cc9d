//! Backend wire types.
//!
//! These mirror the storage backend's REST payloads closely enough to be
//! serialized straight onto the wire by a real client.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumString};

macro_rules! backend_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

backend_id!(
    /// Storage pool identifier.
    PoolId
);
backend_id!(
    /// Filesystem identifier.
    FileSystemId
);
backend_id!(
    /// Export identifier.
    ExportId
);
backend_id!(
    /// Treeq identifier (unique within its filesystem).
    TreeqId
);

/// Metadata key/value pairs attached to a backend object.
pub type Metadata = BTreeMap<String, JsonValue>;

/// A backend filesystem as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystem {
    pub id: FileSystemId,
    pub name: String,
    pub pool_id: PoolId,
    /// Provisioned size in bytes.
    pub size: u64,
}

/// Pagination cursor attached to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-based page number of this listing.
    pub page: u32,
    pub pages_total: u32,
}

impl PageInfo {
    /// Returns true if no page follows this one.
    pub fn is_last(&self) -> bool {
        self.page >= self.pages_total
    }
}

/// One page of filesystems belonging to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemPage {
    pub items: Vec<FileSystem>,
    pub page_info: PageInfo,
}

/// Filesystem creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileSystem {
    pub pool_id: PoolId,
    pub name: String,
    pub ssd_enabled: bool,
    /// Upper-cased provisioning type (`THIN`, `THICK`).
    pub provtype: String,
    pub size: u64,
}

/// Partial filesystem update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// NFS client access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Access {
    #[serde(rename = "RW")]
    #[strum(serialize = "RW")]
    ReadWrite,
    #[serde(rename = "RO")]
    #[strum(serialize = "RO")]
    ReadOnly,
}

/// One export permission entry as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPermission {
    pub access: Access,
    pub client: String,
    pub no_root_squash: bool,
}

/// Export creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExport {
    pub filesystem_id: FileSystemId,
    /// Requested export path; the backend assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
    pub transport_protocols: String,
    pub privileged_port: bool,
    pub permissions: Vec<ExportPermission>,
}

/// An NFS export bound to a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub id: ExportId,
    pub filesystem_id: FileSystemId,
    /// Canonical path as assigned by the backend.
    pub export_path: String,
    #[serde(default)]
    pub permissions: Vec<ExportPermission>,
}

/// Treeq creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTreeq {
    /// Path relative to the filesystem root, always `/<name>`.
    pub path: String,
    pub name: String,
    pub hard_capacity: u64,
    /// Unix permission mode, passed through unvalidated.
    pub mode: String,
}

/// A quota sub-tree inside a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treeq {
    pub id: TreeqId,
    pub filesystem_id: FileSystemId,
    pub name: String,
    /// Path relative to the filesystem root.
    pub path: String,
    pub hard_capacity: u64,
    pub mode: String,
}
