//! ZFS-over-SSH storage backend for CSI.
//!
//! [`ZfsBackend`] implements [`CsiIdentity`], [`CsiController`] and
//! [`CsiNode`] on top of ZFS datasets living on a remote storage host that is
//! only reachable through a remote shell.  Each volume is one dataset:
//!
//! ```text
//! <parent_dataset>/
//!   <volume-id>                # active volume, k8s:deleted=false
//!   <volume-id>-<unix secs>    # soft-deleted volume, k8s:deleted=true
//! ```
//!
//! The controller side provisions datasets through [`ZfsClient`]; the node
//! side mounts them, either by bind mount when running on the storage host or
//! over NFSv4 otherwise.
//!
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode

pub mod client;
pub mod command;
pub mod config;
pub mod controller;
pub mod locks;
pub mod node;
pub mod parse;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use async_trait::async_trait;

pub use client::ZfsClient;
pub use command::{CommandOutput, CommandRunner, SshCommandRunner, SshTarget};
pub use config::{PropertyKeys, ZfsBackendConfig};
pub use node::{HostResolver, Mounter, SystemHostResolver, SystemMounter};

use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::{PluginCapability, PluginInfo};
use locks::VolumeLocks;
use resolver::VolumeResolver;

/// Concrete CSI backend backed by ZFS datasets on a remote host.
///
/// The same type serves both the controller and the node deployment; which
/// half is exercised depends on the requests it receives.
pub struct ZfsBackend {
    config: ZfsBackendConfig,
    client: ZfsClient,
    locks: VolumeLocks,
    mounter: Arc<dyn Mounter>,
    hosts: Arc<dyn HostResolver>,
}

impl ZfsBackend {
    /// Create a backend that runs ZFS commands through `runner` and mounts
    /// with the system mount table and resolver.
    pub fn new(config: ZfsBackendConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            client: ZfsClient::new(runner, config.sudo),
            config,
            locks: VolumeLocks::new(),
            mounter: Arc::new(SystemMounter),
            hosts: Arc::new(SystemHostResolver),
        }
    }

    /// Replace the node-side mount and name-resolution implementations.
    pub fn with_node_ops(mut self, mounter: Arc<dyn Mounter>, hosts: Arc<dyn HostResolver>) -> Self {
        self.mounter = mounter;
        self.hosts = hosts;
        self
    }

    pub fn config(&self) -> &ZfsBackendConfig {
        &self.config
    }

    fn resolver(&self) -> VolumeResolver<'_> {
        VolumeResolver::new(
            &self.client,
            &self.config.parent_dataset,
            &self.config.property_keys,
        )
    }
}

#[async_trait]
impl CsiIdentity for ZfsBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(self.config.plugin_info.clone())
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![
            PluginCapability::ControllerService,
            PluginCapability::OnlineVolumeExpansion,
        ])
    }
}
