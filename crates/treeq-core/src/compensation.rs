//! Compensation log for multi-step provisioning.
//!
//! The backend cannot commit several mutations atomically, so each
//! committed step pushes the action that undoes it. On a later failure the
//! log is unwound newest-first. Unwinding consumes the log, so no action can
//! run twice.

use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, ExportId, FileSystemId, Metadata, StorageApi, TreeqId};
use crate::assembler::TREEQ_COUNT_KEY;
use crate::error::panic_message;

/// Undo action for one committed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteFilesystem(FileSystemId),
    DeleteExport(ExportId),
    DeleteTreeq {
        filesystem: FileSystemId,
        treeq: TreeqId,
    },
    /// Put the treeq counter back to the value it had before the increment.
    RevertTreeqCount { filesystem: FileSystemId, prior: u64 },
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteFilesystem(id) => write!(f, "delete filesystem {id}"),
            Self::DeleteExport(id) => write!(f, "delete export {id}"),
            Self::DeleteTreeq { filesystem, treeq } => {
                write!(f, "delete treeq {treeq} in filesystem {filesystem}")
            }
            Self::RevertTreeqCount { filesystem, prior } => {
                write!(f, "revert treeq count of filesystem {filesystem} to {prior}")
            }
        }
    }
}

impl Compensation {
    async fn run(&self, api: &dyn StorageApi) -> Result<(), ApiError> {
        match self {
            Self::DeleteFilesystem(id) => api.delete_filesystem(*id).await,
            Self::DeleteExport(id) => api.delete_export(*id).await,
            Self::DeleteTreeq { filesystem, treeq } => api.delete_treeq(*filesystem, *treeq).await,
            Self::RevertTreeqCount { filesystem, prior } => {
                let metadata = Metadata::from([(TREEQ_COUNT_KEY.to_string(), (*prior).into())]);
                api.attach_metadata(filesystem.0, &metadata).await
            }
        }
    }
}

/// A compensation that could not be applied. The object it targets may
/// still exist on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} failed: {source}")]
pub struct CompensationError {
    pub action: Compensation,
    #[source]
    pub source: ApiError,
}

/// Stack of undo actions, newest last.
#[derive(Debug, Default)]
pub struct CompensationLog {
    actions: Vec<Compensation>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the undo action for a step that has just committed.
    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Pending actions in the order they would run.
    pub fn pending(&self) -> impl Iterator<Item = &Compensation> {
        self.actions.iter().rev()
    }

    /// Forget every action; the steps they undo are now permanent.
    pub fn commit(mut self) {
        self.actions.clear();
    }

    /// Run every action newest-first.
    ///
    /// A failing or panicking action is logged and collected; the remaining
    /// ones still run.
    pub async fn unwind(self, api: &dyn StorageApi) -> Vec<CompensationError> {
        let mut failures = Vec::new();
        for action in self.actions.into_iter().rev() {
            let outcome = AssertUnwindSafe(action.run(api))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ApiError::other(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match outcome {
                Ok(()) => info!(%action, "compensation applied"),
                Err(source) => {
                    warn!(%action, error = %source, "compensation failed");
                    failures.push(CompensationError { action, source });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiOp, Inventory, MemoryApi};

    #[tokio::test]
    async fn test_unwinds_newest_first() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 1)
                .with_treeqs(1, 1),
        );
        let snapshot = api.snapshot();
        let export = snapshot.exports[0].id;
        let treeq = snapshot.treeqs[0].id;

        let mut log = CompensationLog::new();
        log.push(Compensation::DeleteFilesystem(FileSystemId(1)));
        log.push(Compensation::DeleteExport(export));
        log.push(Compensation::DeleteTreeq {
            filesystem: FileSystemId(1),
            treeq,
        });
        assert_eq!(log.len(), 3);
        assert_eq!(
            log.pending().next(),
            Some(&Compensation::DeleteTreeq {
                filesystem: FileSystemId(1),
                treeq,
            })
        );

        let failures = log.unwind(&api).await;
        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(
            api.mutations(),
            vec![ApiOp::DeleteTreeq, ApiOp::DeleteExport, ApiOp::DeleteFilesystem]
        );
        assert!(api.snapshot().filesystems.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_unwinding() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 1),
        );
        let export = api.snapshot().exports[0].id;
        api.fail_on(ApiOp::DeleteExport);

        let mut log = CompensationLog::new();
        log.push(Compensation::DeleteFilesystem(FileSystemId(1)));
        log.push(Compensation::DeleteExport(export));
        log.push(Compensation::RevertTreeqCount {
            filesystem: FileSystemId(1),
            prior: 4,
        });

        let failures = log.unwind(&api).await;
        // Export deletion was injected to fail; the filesystem delete is then
        // refused because the export still exists.
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].action, Compensation::DeleteExport(export));
        assert_eq!(failures[1].action, Compensation::DeleteFilesystem(FileSystemId(1)));
        assert_eq!(
            api.snapshot().metadata_value(1, TREEQ_COUNT_KEY),
            Some(&serde_json::json!(4))
        );
    }

    #[tokio::test]
    async fn test_panicking_action_does_not_stop_unwinding() {
        let api = MemoryApi::new(
            Inventory::default()
                .with_pool("pool-a", 1)
                .with_filesystem(1, "fs-1", 1, 1)
                .with_filesystem(2, "fs-2", 1, 1),
        );
        let exports: Vec<ExportId> = api.snapshot().exports.iter().map(|e| e.id).collect();
        api.panic_on(ApiOp::DeleteExport);

        let mut log = CompensationLog::new();
        log.push(Compensation::RevertTreeqCount {
            filesystem: FileSystemId(2),
            prior: 7,
        });
        log.push(Compensation::DeleteExport(exports[0]));

        let failures = log.unwind(&api).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].action, Compensation::DeleteExport(exports[0]));
        assert!(
            matches!(&failures[0].source, ApiError::Other(msg) if msg.contains("delete_export")),
            "{:?}",
            failures[0].source
        );
        assert_eq!(
            api.snapshot().metadata_value(2, TREEQ_COUNT_KEY),
            Some(&serde_json::json!(7))
        );
    }

    #[tokio::test]
    async fn test_commit_runs_nothing() {
        let api = MemoryApi::default();
        let mut log = CompensationLog::new();
        log.push(Compensation::DeleteFilesystem(FileSystemId(1)));
        log.commit();
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_display() {
        let action = Compensation::DeleteTreeq {
            filesystem: FileSystemId(3),
            treeq: TreeqId(9),
        };
        assert_eq!(action.to_string(), "delete treeq 9 in filesystem 3");
    }
}
