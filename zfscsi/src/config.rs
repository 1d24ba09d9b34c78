//! Command line and environment configuration.
//!
//! Every flag can also be supplied through the environment variable named in
//! its `env` attribute, which is how the plugin is configured when deployed.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use libcsi::ZfsBackendConfig;
use libcsi::backend::zfs::SshTarget;

#[derive(Parser, Debug)]
#[command(name = "zfscsi", version, about = "CSI plugin serving ZFS datasets over SSH")]
pub struct Cli {
    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true, env = "LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the Identity, Controller and Node services.
    Serve(ServeArgs),
    /// Probe a running plugin and exit non-zero unless it is ready.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// UDP address the QUIC endpoint listens on.
    #[arg(long, env = "CSI_ENDPOINT", default_value = "0.0.0.0:7443")]
    pub endpoint: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long, env = "CSI_TLS_CERT")]
    pub tls_cert: PathBuf,

    /// PEM private key of the certificate.
    #[arg(long, env = "CSI_TLS_KEY")]
    pub tls_key: PathBuf,

    /// Storage host running ZFS.
    #[arg(long, env = "STORAGE_HOST")]
    pub storage_host: String,

    #[arg(long, env = "STORAGE_SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,

    #[arg(long, env = "STORAGE_SSH_USER")]
    pub ssh_user: String,

    #[arg(long, env = "STORAGE_SSH_KEY_FILE")]
    pub ssh_key_file: PathBuf,

    /// Known hosts file pinning the storage host key.  Without it the host
    /// key is not checked.
    #[arg(long, env = "STORAGE_SSH_KNOWN_HOSTS")]
    pub ssh_known_hosts: Option<PathBuf>,

    /// Run ZFS commands through sudo.
    #[arg(long, env = "STORAGE_SSH_SUDO")]
    pub ssh_sudo: bool,

    /// Dataset under which volumes are created.
    #[arg(long, env = "STORAGE_ZFS_DATASET")]
    pub parent_dataset: String,

    /// Identity of this node; equal to the storage host on the storage host.
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Where volume datasets are mounted on the storage host.
    #[arg(long, env = "LOCAL_DATASET_ROOT", default_value = "/dataset")]
    pub local_dataset_root: PathBuf,

    /// Adopt datasets created under the older naming scheme.
    #[arg(long, env = "LEGACY_LOOKUP", default_value_t = true, action = ArgAction::Set)]
    pub legacy_lookup: bool,
}

impl ServeArgs {
    pub fn ssh_target(&self) -> SshTarget {
        SshTarget {
            host: self.storage_host.clone(),
            port: self.ssh_port,
            user: self.ssh_user.clone(),
            identity_file: self.ssh_key_file.clone(),
            known_hosts: self.ssh_known_hosts.clone(),
        }
    }

    pub fn backend_config(&self) -> ZfsBackendConfig {
        let mut config = ZfsBackendConfig::new(
            self.parent_dataset.clone(),
            self.node_id.clone(),
            self.storage_host.clone(),
        );
        config.sudo = self.ssh_sudo;
        config.legacy_lookup = self.legacy_lookup;
        config.local_dataset_root = self.local_dataset_root.clone();
        config
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(long, env = "CSI_ENDPOINT", default_value = "127.0.0.1:7443")]
    pub endpoint: SocketAddr,

    /// Name the server certificate is issued for.
    #[arg(long, env = "CSI_SERVER_NAME", default_value = "localhost")]
    pub server_name: String,

    /// PEM certificate(s) to trust; the server's own certificate works.
    #[arg(long, env = "CSI_TLS_CERT")]
    pub trust: PathBuf,
}
