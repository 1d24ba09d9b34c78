//! Mapping from volume identifiers to dataset paths.
//!
//! A volume lives at `<parent>/<volume_id>`.  Datasets provisioned under an
//! older naming scheme are found by their tags and moved to that path the
//! first time they are touched by a create.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use super::client::ZfsClient;
use super::config::PropertyKeys;
use crate::error::CsiError;
use crate::types::{VolumeId, VolumeState};

/// Join a parent dataset and a leaf segment with exactly one separator.
pub fn dataset_path(parent: &str, leaf: &str) -> Result<String, CsiError> {
    if leaf.is_empty() {
        return Err(CsiError::InvalidArgument("volume id must not be empty".into()));
    }
    if leaf.contains('/') {
        return Err(CsiError::InvalidArgument(format!(
            "volume id {leaf:?} must not contain '/'"
        )));
    }
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        Ok(leaf.to_owned())
    } else {
        Ok(format!("{parent}/{leaf}"))
    }
}

/// Last segment of a dataset path.
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Claim coordinates used to find a dataset by its tags.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRef<'a> {
    pub namespace: &'a str,
    pub pvc: &'a str,
}

pub struct VolumeResolver<'a> {
    client: &'a ZfsClient,
    parent: &'a str,
    keys: &'a PropertyKeys,
}

impl<'a> VolumeResolver<'a> {
    pub fn new(client: &'a ZfsClient, parent: &'a str, keys: &'a PropertyKeys) -> Self {
        Self {
            client,
            parent,
            keys,
        }
    }

    /// Canonical dataset path of `id`.
    pub fn canonical(&self, id: &VolumeId) -> Result<String, CsiError> {
        dataset_path(self.parent, id.as_str())
    }

    /// Path of `id` if its dataset exists.
    pub async fn resolve_existing(&self, id: &VolumeId) -> Result<Option<String>, CsiError> {
        let path = self.canonical(id)?;
        Ok(self.client.exists(&path).await?.then_some(path))
    }

    /// Move an active dataset tagged with `claim` to `canonical` if it lives
    /// elsewhere.
    ///
    /// Returns whether a tagged dataset was found at all.  A dataset already
    /// at `canonical` wins over any other match, which is left in place.
    #[instrument(skip(self))]
    pub async fn adopt_legacy(&self, canonical: &str, claim: ClaimRef<'_>) -> Result<bool, CsiError> {
        let mut criteria = BTreeMap::from([
            (self.keys.namespace.clone(), claim.namespace.to_owned()),
            (self.keys.pvc.clone(), claim.pvc.to_owned()),
        ]);
        criteria.extend(self.keys.state_tags(VolumeState::Active));

        let Some(found) = self.client.find_by_properties(&criteria).await? else {
            return Ok(false);
        };
        if found == canonical {
            return Ok(true);
        }
        if self.client.exists(canonical).await? {
            warn!(
                duplicate = %found,
                dataset = %canonical,
                "claim matches more than one dataset, keeping canonical"
            );
            return Ok(true);
        }
        info!(from = %found, to = %canonical, "moving dataset to canonical path");
        self.client.rename(&found, canonical).await?;
        Ok(true)
    }
}
