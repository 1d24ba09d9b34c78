//! Backend configuration.
//!
//! Everything the backend needs is handed to it once, at construction, in a
//! [`ZfsBackendConfig`].  Nothing here is read from the environment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{PluginInfo, VolumeState};

/// Value of the `sharenfs` property for every volume.
pub const SHARENFS_ON: &str = "on";

/// Names of the ZFS user properties used to tag volume datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyKeys {
    pub sharenfs: String,
    pub namespace: String,
    pub pv: String,
    pub pvc: String,
    /// `"true"` or `"false"`.
    pub deleted: String,
    /// Unix seconds at which the volume was soft-deleted.
    pub deleted_at: String,
}

impl Default for PropertyKeys {
    fn default() -> Self {
        Self {
            sharenfs: "sharenfs".to_owned(),
            namespace: "k8s:namespace".to_owned(),
            pv: "k8s:pv".to_owned(),
            pvc: "k8s:pvc".to_owned(),
            deleted: "k8s:deleted".to_owned(),
            deleted_at: "k8s:deleted-at".to_owned(),
        }
    }
}

impl PropertyKeys {
    /// Properties that persist `state`.
    pub fn state_tags(&self, state: VolumeState) -> BTreeMap<String, String> {
        match state {
            VolumeState::Active => BTreeMap::from([(self.deleted.clone(), "false".to_owned())]),
            VolumeState::SoftDeleted { at } => {
                let mut tags = BTreeMap::from([(self.deleted.clone(), "true".to_owned())]);
                if let Some(at) = at {
                    tags.insert(self.deleted_at.clone(), at.to_string());
                }
                tags
            }
        }
    }

    /// Read the lifecycle state back from a dataset's properties.
    ///
    /// `None` when the deleted flag is missing or not a boolean.
    pub fn parse_state(&self, properties: &BTreeMap<String, String>) -> Option<VolumeState> {
        match properties.get(&self.deleted).map(String::as_str) {
            Some("false") => Some(VolumeState::Active),
            Some("true") => Some(VolumeState::SoftDeleted {
                at: properties
                    .get(&self.deleted_at)
                    .and_then(|at| at.parse().ok()),
            }),
            _ => None,
        }
    }
}

/// Immutable settings for [`ZfsBackend`](super::ZfsBackend).
#[derive(Debug, Clone)]
pub struct ZfsBackendConfig {
    /// Dataset under which volumes are created; may be empty.
    pub parent_dataset: String,
    /// Identity of the node this process runs on.
    pub node_id: String,
    /// Name of the storage host, compared with `node_id` and resolved for
    /// network mounts.
    pub storage_host: String,
    /// Prefix remote commands with `sudo`.
    pub sudo: bool,
    /// Search datasets created under an older naming scheme by their tags
    /// and move them to the canonical path on create.
    pub legacy_lookup: bool,
    /// Where volume datasets appear on the storage host's own filesystem.
    pub local_dataset_root: PathBuf,
    /// Permission mode applied to a new volume's mountpoint.
    pub volume_mode: String,
    pub property_keys: PropertyKeys,
    pub plugin_info: PluginInfo,
}

impl ZfsBackendConfig {
    pub fn new(
        parent_dataset: impl Into<String>,
        node_id: impl Into<String>,
        storage_host: impl Into<String>,
    ) -> Self {
        Self {
            parent_dataset: parent_dataset.into(),
            node_id: node_id.into(),
            storage_host: storage_host.into(),
            sudo: false,
            legacy_lookup: true,
            local_dataset_root: PathBuf::from("/dataset"),
            volume_mode: "777".to_owned(),
            property_keys: PropertyKeys::default(),
            plugin_info: PluginInfo {
                name: "rk8s.zfs.csi".to_owned(),
                vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            },
        }
    }

    /// Whether this process runs on the storage host itself.
    pub fn is_storage_host(&self) -> bool {
        self.node_id == self.storage_host
    }
}
