//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion, expansion, publication, and listing.  It is typically invoked by
//! the control plane, never on the node that consumes the volume.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerPublishVolumeRequest, CreateSnapshotRequest, CreateVolumeRequest,
    ListVolumesRequest, ListVolumesResponse, Snapshot, Volume, VolumeCapability, VolumeId,
};

/// Controller service — centralized volume management.
///
/// Operations a backend does not offer must fail with
/// [`CsiError::Unimplemented`] rather than report success.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Must be idempotent: repeating a request for an existing volume returns
    /// the same volume without provisioning a second one.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    ///
    /// Deleting a volume that does not exist succeeds.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Make the volume reachable from `req.node_id`.
    ///
    /// The returned map is forwarded to the node as publish context.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError>;

    /// Reverse [`Self::controller_publish_volume`].
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// Grow a volume to the requested capacity.
    async fn expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// List volumes known to this controller.
    async fn list_volumes(&self, req: ListVolumesRequest) -> Result<ListVolumesResponse, CsiError>;

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError>;

    /// Advertise the Controller RPCs this backend implements.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// Fetch a single volume together with its condition.
    async fn get_volume(&self, volume_id: &VolumeId) -> Result<Volume, CsiError>;

    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<Snapshot, CsiError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CsiError>;

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, CsiError>;
}
