//! Provisioning error types.

use std::any::Any;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::api::{ApiError, FileSystemId};
use crate::compensation::CompensationError;

/// Provisioning error.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Required configuration keys are missing. Maps field → problem.
    #[error("invalid configuration: {}", describe_problems(.0))]
    InvalidConfig(BTreeMap<String, String>),

    /// Capacity string is not `<integer>gib` or `<integer>tib`.
    #[error("invalid size format {0:?}: expected <integer>gib or <integer>tib")]
    InvalidSizeFormat(String),

    /// Export permission rules are malformed, missing fields or mistyped.
    #[error("invalid export permission rule: {0}")]
    InvalidPermissionRule(String),

    /// Storage pool name did not resolve.
    #[error("storage pool not found: {name}")]
    PoolNotFound {
        name: String,
        #[source]
        source: ApiError,
    },

    /// A read-only backend query failed.
    #[error("backend query failed: {context}")]
    BackendQueryFailed {
        context: String,
        #[source]
        source: ApiError,
    },

    /// The backend already holds the maximum number of filesystems.
    #[error("filesystem quota exceeded: {current} filesystems exist, limit is {max}")]
    FilesystemQuotaExceeded { current: u64, max: u64 },

    #[error("failed to create filesystem {name}")]
    FilesystemCreateFailed {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to export filesystem {filesystem}")]
    ExportCreateFailed {
        filesystem: FileSystemId,
        #[source]
        source: ApiError,
    },

    #[error("failed to create treeq {name} in filesystem {filesystem}")]
    TreeqCreateFailed {
        name: String,
        filesystem: FileSystemId,
        #[source]
        source: ApiError,
    },

    #[error("failed to update metadata on filesystem {filesystem}")]
    MetadataUpdateFailed {
        filesystem: FileSystemId,
        #[source]
        source: ApiError,
    },

    #[error("failed to resize filesystem {filesystem} to {size} bytes")]
    FilesystemSizeUpdateFailed {
        filesystem: FileSystemId,
        size: u64,
        #[source]
        source: ApiError,
    },

    /// Rollback after `source` left backend objects behind.
    #[error("{source}; rollback incomplete ({} compensation(s) failed)", .cleanup.len())]
    CompensationFailed {
        #[source]
        source: Box<ProvisionError>,
        cleanup: Vec<CompensationError>,
    },

    /// The provisioning flow panicked; the message is the panic payload.
    #[error("provisioning panicked: {0}")]
    Panicked(String),
}

impl ProvisionError {
    /// Create a BackendQueryFailed error.
    pub fn query(context: impl Into<String>, source: ApiError) -> Self {
        Self::BackendQueryFailed {
            context: context.into(),
            source,
        }
    }

    /// Returns the error that started a rollback, looking through
    /// `CompensationFailed`.
    pub fn root(&self) -> &ProvisionError {
        match self {
            Self::CompensationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Cleanup failures attached to this error.
    pub fn cleanup_errors(&self) -> &[CompensationError] {
        match self {
            Self::CompensationFailed { cleanup, .. } => cleanup,
            _ => &[],
        }
    }
}

fn describe_problems(problems: &BTreeMap<String, String>) -> String {
    problems.values().cloned().collect::<Vec<_>>().join(", ")
}

/// Provisioning result type.
pub type TreeqResult<T> = Result<T, ProvisionError>;

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
