//! `zfscsi` — CSI plugin exposing ZFS datasets on a remote storage host.

mod config;
mod tls;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use libcsi::backend::zfs::SshCommandRunner;
use libcsi::{CsiClient, CsiMessage, CsiServer, ZfsBackend};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Cli, Command, ProbeArgs, ServeArgs};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Probe(args) => probe(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let tls = tls::server_config(&args.tls_cert, &args.tls_key)?;
    let runner = Arc::new(SshCommandRunner::new(args.ssh_target()));
    let backend = Arc::new(ZfsBackend::new(args.backend_config(), runner));
    let server = CsiServer::new(args.endpoint, tls, backend).context("start CSI server")?;

    info!(
        endpoint = %args.endpoint,
        node_id = %args.node_id,
        storage_host = %args.storage_host,
        dataset = %args.parent_dataset,
        "zfscsi serving",
    );

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("wait for shutdown signal")?;
            info!("shutting down");
            server.endpoint().close(0u32.into(), b"shutdown");
        }
    }
    Ok(())
}

async fn probe(args: ProbeArgs) -> Result<()> {
    let tls = tls::client_config(&args.trust)?;
    let client = CsiClient::connect(args.endpoint, &args.server_name, tls)
        .await
        .with_context(|| format!("connect to {}", args.endpoint))?;
    let reply = client.call(&CsiMessage::Probe).await.context("probe")?;
    client.close();

    match reply {
        CsiMessage::ProbeResult(true) => {
            info!(endpoint = %args.endpoint, "plugin ready");
            Ok(())
        }
        other => bail!("plugin not ready: {other}"),
    }
}
