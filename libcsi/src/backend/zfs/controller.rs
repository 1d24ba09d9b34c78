//! Controller service: volume lifecycle on the storage host.
//!
//! Every mutating operation holds the volume's lock from [`VolumeLocks`] for
//! its whole duration.  Volumes are never destroyed: delete tags the dataset
//! as deleted and renames it out of the way with a timestamp suffix, plus a
//! counter when that name is already taken.
//!
//! [`VolumeLocks`]: super::locks::VolumeLocks

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::ZfsBackend;
use super::config::SHARENFS_ON;
use super::resolver::{ClaimRef, leaf_name};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::types::*;

pub const PARAM_PVC_NAMESPACE: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PARAM_PVC_NAME: &str = "csi.storage.k8s.io/pvc/name";
pub const PARAM_PV_NAME: &str = "csi.storage.k8s.io/pv/name";

/// Key of the dataset path in a volume's context.
pub const CONTEXT_DATASET: &str = "dataset";

fn required_param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, CsiError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CsiError::InvalidArgument(format!("parameter {key} is required")))
}

fn required_capacity(range: Option<CapacityRange>) -> Result<u64, CsiError> {
    match range {
        Some(range) if range.required_bytes > 0 => Ok(range.required_bytes),
        _ => Err(CsiError::InvalidArgument(
            "capacity range with non-zero required bytes is required".into(),
        )),
    }
}

fn unix_now() -> Result<u64, CsiError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(CsiError::internal)
}

impl ZfsBackend {
    fn volume(&self, id: VolumeId, capacity_bytes: u64, path: &str) -> Volume {
        Volume {
            volume_id: id,
            capacity_bytes,
            parameters: HashMap::new(),
            volume_context: HashMap::from([(CONTEXT_DATASET.to_owned(), path.to_owned())]),
            accessible_topology: Vec::new(),
        }
    }

    async fn volume_state(&self, path: &str) -> Result<Option<VolumeState>, CsiError> {
        let keys = &self.config.property_keys;
        let tags = self
            .client
            .get_properties(path, &[keys.deleted.as_str(), keys.deleted_at.as_str()])
            .await?;
        Ok(keys.parse_state(&tags))
    }

    /// First free `<path>-<at>[-<n>]` name.
    async fn hidden_path(&self, path: &str, at: u64) -> Result<String, CsiError> {
        let base = format!("{path}-{at}");
        let mut hidden = base.clone();
        let mut n = 1u32;
        while self.client.exists(&hidden).await? {
            hidden = format!("{base}-{n}");
            n += 1;
        }
        Ok(hidden)
    }

    /// Tag `path` as deleted and move it out of the canonical namespace.
    async fn soft_delete(&self, path: &str) -> Result<String, CsiError> {
        let at = unix_now()?;
        let tags = self
            .config
            .property_keys
            .state_tags(VolumeState::SoftDeleted { at: Some(at) });
        self.client.set_properties(path, &tags).await?;

        let hidden = self.hidden_path(path, at).await?;
        self.client.rename(path, &hidden).await?;
        Ok(hidden)
    }
}

#[async_trait]
impl CsiController for ZfsBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name is required".into()));
        }
        let capacity = required_capacity(req.capacity_range)?;
        if req.volume_content_source.is_some() {
            return Err(CsiError::InvalidArgument(
                "volume content source is not supported".into(),
            ));
        }
        if req.accessibility_requirements.is_some() {
            return Err(CsiError::InvalidArgument(
                "accessibility requirements are not supported".into(),
            ));
        }
        if req.mutable_parameters.is_some() {
            return Err(CsiError::InvalidArgument(
                "mutable parameters are not supported".into(),
            ));
        }
        let namespace = required_param(&req.parameters, PARAM_PVC_NAMESPACE)?;
        let pvc = required_param(&req.parameters, PARAM_PVC_NAME)?;
        let pv = required_param(&req.parameters, PARAM_PV_NAME)?;

        let id = VolumeId::from(req.name.as_str());
        let resolver = self.resolver();
        let path = resolver.canonical(&id)?;
        let _guard = self.locks.lock(id.as_str()).await;

        let keys = &self.config.property_keys;
        let mut tags = BTreeMap::from([
            (keys.sharenfs.clone(), SHARENFS_ON.to_owned()),
            (keys.namespace.clone(), namespace.to_owned()),
            (keys.pv.clone(), pv.to_owned()),
            (keys.pvc.clone(), pvc.to_owned()),
        ]);
        tags.extend(keys.state_tags(VolumeState::Active));

        // A delete that tagged the dataset but failed to rename it leaves it
        // at the canonical path.
        if self.client.exists(&path).await? {
            match self.volume_state(&path).await? {
                Some(VolumeState::Active) => {}
                Some(VolumeState::SoftDeleted { .. }) => {
                    let hidden = self.soft_delete(&path).await?;
                    warn!(dataset = %path, renamed = %hidden, "finished interrupted delete");
                }
                None => {
                    debug!(dataset = %path, "tagging existing dataset");
                    self.client.set_properties(&path, &tags).await?;
                }
            }
        }

        if self.config.legacy_lookup
            && resolver
                .adopt_legacy(&path, ClaimRef { namespace, pvc })
                .await?
        {
            debug!(dataset = %path, "refreshing tags of existing dataset");
            self.client.set_properties(&path, &tags).await?;
        }

        if self.client.create_if_absent(&path, &tags).await? {
            info!(dataset = %path, "dataset created");
        }
        self.client.chmod(&path, &self.config.volume_mode).await?;
        self.client.set_quota(&path, capacity).await?;
        self.client.share(&path).await?;

        info!(dataset = %path, capacity, "volume ready");
        Ok(self.volume(id, capacity, &path))
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let _guard = self.locks.lock(volume_id.as_str()).await;
        let Some(path) = self.resolver().resolve_existing(volume_id).await? else {
            debug!("no dataset, nothing to delete");
            return Ok(());
        };

        let hidden = self.soft_delete(&path).await?;
        info!(dataset = %path, renamed = %hidden, "volume soft-deleted");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError> {
        let _guard = self.locks.lock(req.volume_id.as_str()).await;
        let path = self
            .resolver()
            .resolve_existing(&req.volume_id)
            .await?
            .ok_or_else(|| CsiError::VolumeNotFound(req.volume_id.to_string()))?;
        self.client.share(&path).await?;
        Ok(HashMap::from([(CONTEXT_DATASET.to_owned(), path)]))
    }

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError> {
        debug!(%volume_id, node_id, "controller unpublish is a no-op");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        let capacity = required_capacity(req.capacity_range)?;
        let _guard = self.locks.lock(req.volume_id.as_str()).await;
        let path = self
            .resolver()
            .resolve_existing(&req.volume_id)
            .await?
            .ok_or_else(|| CsiError::VolumeNotFound(req.volume_id.to_string()))?;

        self.client.set_quota(&path, capacity).await?;
        info!(dataset = %path, capacity, "volume expanded");
        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: capacity,
            node_expansion_required: false,
        })
    }

    async fn validate_volume_capabilities(
        &self,
        _volume_id: &VolumeId,
        _capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        Err(CsiError::unimplemented("validate volume capabilities"))
    }

    #[instrument(skip(self))]
    async fn list_volumes(&self, req: ListVolumesRequest) -> Result<ListVolumesResponse, CsiError> {
        if req.max_entries != 0 || !req.starting_token.is_empty() {
            return Err(CsiError::InvalidArgument(
                "pagination is not supported".into(),
            ));
        }

        let keys = &self.config.property_keys;
        let tag_keys = [keys.deleted.as_str(), keys.deleted_at.as_str()];
        let mut entries = Vec::new();
        for record in self.client.list_children(&self.config.parent_dataset).await? {
            let capacity = record.quota.ok_or_else(|| {
                CsiError::Internal(format!("dataset {} has no quota", record.name))
            })?;
            let tags = self.client.get_properties(&record.name, &tag_keys).await?;
            match keys.parse_state(&tags) {
                Some(VolumeState::Active) => {
                    let id = VolumeId::from(leaf_name(&record.name));
                    entries.push(self.volume(id, capacity, &record.name));
                }
                Some(VolumeState::SoftDeleted { .. }) => {}
                None => warn!(dataset = %record.name, "dataset without a valid deleted tag, skipping"),
            }
        }
        debug!(count = entries.len(), "volumes listed");
        Ok(ListVolumesResponse {
            entries,
            next_token: String::new(),
        })
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("get capacity"))
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
            ControllerCapability::ListVolumes,
            ControllerCapability::ExpandVolume,
            ControllerCapability::SingleNodeMultiWriter,
        ])
    }

    async fn get_volume(&self, _volume_id: &VolumeId) -> Result<Volume, CsiError> {
        Err(CsiError::unimplemented("controller get volume"))
    }

    async fn create_snapshot(&self, _req: CreateSnapshotRequest) -> Result<Snapshot, CsiError> {
        Err(CsiError::unimplemented("create snapshot"))
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("delete snapshot"))
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, CsiError> {
        Err(CsiError::unimplemented("list snapshots"))
    }
}
