//! Treeq provisioning.
//!
//! [`TreeqAssembler`] turns a request into a treeq inside an exported
//! filesystem, reusing an existing filesystem when placement finds one:
//!
//! ```text
//! Validating
//!     │
//! SelectingPlacement ──── candidate ───────────────────────────┐
//!     │ none                                                    │
//! CreatingFilesystem → CreatingExport → TaggingFilesystem      │
//!     │                                                         │
//! CreatingTreeq ◄───────────────────────────────────────────────┘
//!     │
//! UpdatingMetadataCount
//!     │
//! UpdatingFilesystemSize (reused filesystems only)
//!     │
//! Done
//! ```
//!
//! Every committed mutation registers its undo action in a
//! [`CompensationLog`]; any later failure, including a panic, unwinds it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};

use crate::api::{
    CreateTreeq, ExportId, FileSystemId, FileSystemPatch, Metadata, PoolId, StorageApi, TreeqId,
};
use crate::compensation::{Compensation, CompensationLog};
use crate::config::ProvisionConfig;
use crate::error::{panic_message, ProvisionError, TreeqResult};
use crate::export::{create_export, join_path, parse_permission_rules};
use crate::filesystem::{create_filesystem, ownership_metadata};
use crate::placement::find_candidate;

/// Metadata key holding a filesystem's treeq count.
pub const TREEQ_COUNT_KEY: &str = "host.k8s.treeqs";

/// Provisioning step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    #[default]
    Validating,
    SelectingPlacement,
    CreatingFilesystem,
    CreatingExport,
    TaggingFilesystem,
    CreatingTreeq,
    UpdatingMetadataCount,
    UpdatingFilesystemSize,
    Done,
}

/// One volume request.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub volume_name: String,
    /// Requested bytes; zero means the configured `pv_size`.
    pub capacity: u64,
    pub config: ProvisionConfig,
}

impl ProvisionRequest {
    pub fn new(volume_name: impl Into<String>, capacity: u64, config: ProvisionConfig) -> Self {
        Self {
            volume_name: volume_name.into(),
            capacity,
            config,
        }
    }
}

/// A provisioned volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub treeq_id: TreeqId,
    pub filesystem_id: FileSystemId,
    /// Address clients mount from.
    pub server_address: String,
    /// Export path joined with the treeq's relative path.
    pub volume_path: String,
}

/// Working state of one provisioning call.
#[derive(Debug, Default)]
struct ProvisioningState {
    step: Step,
    pool_id: Option<PoolId>,
    filesystem_id: Option<FileSystemId>,
    export_id: Option<ExportId>,
    export_path: Option<String>,
    treeq_count: u64,
    /// Size of the reused filesystem at selection; `None` when newly created.
    reused_size: Option<u64>,
    treeq_id: Option<TreeqId>,
}

/// Runs the treeq provisioning protocol against one backend.
#[derive(Clone)]
pub struct TreeqAssembler {
    api: Arc<dyn StorageApi>,
}

impl std::fmt::Debug for TreeqAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeqAssembler").finish_non_exhaustive()
    }
}

impl TreeqAssembler {
    pub fn new(api: Arc<dyn StorageApi>) -> Self {
        Self { api }
    }

    /// Provision `volume_name` with `capacity` bytes using storage-class
    /// `options`.
    pub async fn provision_nfs_volume(
        &self,
        options: HashMap<String, String>,
        volume_name: &str,
        capacity: u64,
    ) -> TreeqResult<ProvisionResult> {
        let request = ProvisionRequest::new(volume_name, capacity, ProvisionConfig::new(options));
        self.provision(&request).await
    }

    /// Provision a volume, rolling back every committed step on failure.
    #[tracing::instrument(skip(self, request), fields(volume = %request.volume_name, capacity = request.capacity))]
    pub async fn provision(&self, request: &ProvisionRequest) -> TreeqResult<ProvisionResult> {
        let mut state = ProvisioningState::default();
        let mut log = CompensationLog::new();

        let outcome = AssertUnwindSafe(self.run(request, &mut state, &mut log))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(result)) => {
                log.commit();
                info!(
                    treeq = %result.treeq_id,
                    filesystem = %result.filesystem_id,
                    path = %result.volume_path,
                    "volume provisioned"
                );
                return Ok(result);
            }
            Ok(Err(error)) => error,
            Err(payload) => ProvisionError::Panicked(panic_message(payload.as_ref())),
        };

        warn!(
            step = %state.step,
            pool = ?state.pool_id,
            filesystem = ?state.filesystem_id,
            export = ?state.export_id,
            export_path = ?state.export_path,
            treeq = ?state.treeq_id,
            pending = log.len(),
            error = %error,
            "provisioning failed, rolling back"
        );
        let cleanup = log.unwind(self.api.as_ref()).await;
        if cleanup.is_empty() {
            Err(error)
        } else {
            Err(ProvisionError::CompensationFailed {
                source: Box::new(error),
                cleanup,
            })
        }
    }

    async fn run(
        &self,
        request: &ProvisionRequest,
        state: &mut ProvisioningState,
        log: &mut CompensationLog,
    ) -> TreeqResult<ProvisionResult> {
        let api = self.api.as_ref();
        let config = &request.config;
        let name = request.volume_name.as_str();

        // Nothing below mutates the backend until CreatingFilesystem.
        state.step = Step::Validating;
        config.validate().map_err(ProvisionError::InvalidConfig)?;
        if name.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                [("volume_name".to_string(), "volume_name value missing".to_string())].into(),
            ));
        }
        let capacity = match request.capacity {
            0 => config.default_pv_bytes()?,
            bytes => bytes,
        };
        let permissions = parse_permission_rules(&config.export_permission_records()?)?;
        let server_address = api
            .network_space_ip(config.network_space())
            .await
            .map_err(|e| {
                ProvisionError::query(format!("network space {}", config.network_space()), e)
            })?;

        state.step = Step::SelectingPlacement;
        let placement = find_candidate(api, config, config.pool_name(), capacity).await?;
        state.pool_id = Some(placement.pool_id);

        let (filesystem_id, export_path) = match placement.candidate {
            Some(candidate) => {
                state.treeq_count = candidate.treeq_count;
                state.reused_size = Some(candidate.filesystem.size);
                (candidate.filesystem.id, candidate.export_path)
            }
            None => {
                state.step = Step::CreatingFilesystem;
                let filesystem_id =
                    create_filesystem(api, config, placement.pool_id, name, capacity).await?;
                log.push(Compensation::DeleteFilesystem(filesystem_id));
                state.filesystem_id = Some(filesystem_id);

                state.step = Step::CreatingExport;
                let export =
                    create_export(api, filesystem_id, config.fs_prefix(), name, &permissions)
                        .await?;
                log.push(Compensation::DeleteExport(export.id));
                state.export_id = Some(export.id);

                state.step = Step::TaggingFilesystem;
                api.attach_metadata(filesystem_id.0, &ownership_metadata(name))
                    .await
                    .map_err(|source| ProvisionError::MetadataUpdateFailed {
                        filesystem: filesystem_id,
                        source,
                    })?;
                debug!(filesystem = %filesystem_id, "ownership metadata attached");

                (filesystem_id, export.path)
            }
        };
        state.filesystem_id = Some(filesystem_id);
        state.export_path = Some(export_path.clone());

        state.step = Step::CreatingTreeq;
        let treeq_request = CreateTreeq {
            path: format!("/{name}"),
            name: name.to_string(),
            hard_capacity: capacity,
            mode: config.permission_mode().to_string(),
        };
        let treeq = api
            .create_treeq(filesystem_id, &treeq_request)
            .await
            .map_err(|source| ProvisionError::TreeqCreateFailed {
                name: name.to_string(),
                filesystem: filesystem_id,
                source,
            })?;
        log.push(Compensation::DeleteTreeq {
            filesystem: filesystem_id,
            treeq: treeq.id,
        });
        state.treeq_id = Some(treeq.id);
        info!(filesystem = %filesystem_id, treeq = %treeq.id, "treeq created");

        state.step = Step::UpdatingMetadataCount;
        let prior = state.treeq_count;
        let counter = Metadata::from([(TREEQ_COUNT_KEY.to_string(), (prior + 1).into())]);
        api.attach_metadata(filesystem_id.0, &counter)
            .await
            .map_err(|source| ProvisionError::MetadataUpdateFailed {
                filesystem: filesystem_id,
                source,
            })?;
        log.push(Compensation::RevertTreeqCount {
            filesystem: filesystem_id,
            prior,
        });

        if let Some(size) = state.reused_size {
            state.step = Step::UpdatingFilesystemSize;
            let size = size + capacity;
            api.update_filesystem(filesystem_id, &FileSystemPatch { size: Some(size) })
                .await
                .map_err(|source| ProvisionError::FilesystemSizeUpdateFailed {
                    filesystem: filesystem_id,
                    size,
                    source,
                })?;
            debug!(filesystem = %filesystem_id, size, "filesystem grown");
        }

        state.step = Step::Done;
        Ok(ProvisionResult {
            treeq_id: treeq.id,
            filesystem_id,
            server_address,
            volume_path: join_path(&export_path, &treeq.path),
        })
    }
}
