//! QUIC server that runs beside the controller and on each worker node, and
//! dispatches incoming CSI requests to the appropriate trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    ///
    /// `tls_config` must carry the server certificate chain and key; ALPN is
    /// not negotiated.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.  Requests for the same
    /// volume are serialized by the backend, not here.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        // Read the full request.
        let buf = recv
            .read_to_end(16 * 1024 * 1024)
            .await
            .map_err(CsiError::transport)?;

        let request: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| CsiError::TransportError(format!("malformed request: {e}")))?;

        debug!(%request, "CSI request received");

        let response = Self::dispatch(handler, request).await;

        // Serialize and send the response.
        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        fn reply<V>(result: Result<V, CsiError>, ok: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
            match result {
                Ok(v) => ok(v),
                Err(e) => CsiMessage::Error(e),
            }
        }

        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => reply(
                handler.get_plugin_info().await,
                CsiMessage::PluginInfoResponse,
            ),
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(id) => {
                reply(handler.delete_volume(&id).await, |()| CsiMessage::Ok)
            }
            CsiMessage::ControllerPublishVolume(req) => reply(
                handler.controller_publish_volume(req).await,
                CsiMessage::VolumePublished,
            ),
            CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => reply(
                handler
                    .controller_unpublish_volume(&volume_id, &node_id)
                    .await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::ControllerExpandVolume(req) => reply(
                CsiController::expand_volume(handler, req).await,
                CsiMessage::VolumeExpanded,
            ),
            CsiMessage::ListVolumes(req) => {
                reply(handler.list_volumes(req).await, CsiMessage::VolumeList)
            }
            CsiMessage::GetCapacity => reply(handler.get_capacity().await, CsiMessage::Capacity),
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                CsiMessage::CapabilitiesValid,
            ),
            CsiMessage::ControllerGetCapabilities => reply(
                CsiController::get_capabilities(handler).await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),
            CsiMessage::ControllerGetVolume(id) => {
                reply(handler.get_volume(&id).await, CsiMessage::VolumeResponse)
            }
            CsiMessage::CreateSnapshot(req) => {
                reply(handler.create_snapshot(req).await, CsiMessage::SnapshotCreated)
            }
            CsiMessage::DeleteSnapshot(id) => {
                reply(handler.delete_snapshot(&id).await, |()| CsiMessage::Ok)
            }
            CsiMessage::ListSnapshots => {
                reply(handler.list_snapshots().await, CsiMessage::SnapshotList)
            }

            // --- Node -------------------------------------------------------
            CsiMessage::StageVolume(req) => {
                reply(handler.stage_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => reply(
                handler
                    .unstage_volume(&volume_id, &staging_target_path)
                    .await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::PublishVolume(req) => {
                reply(handler.publish_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => reply(
                handler.unpublish_volume(&volume_id, &target_path).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::NodeExpandVolume {
                volume_id,
                volume_path,
            } => reply(
                CsiNode::expand_volume(handler, &volume_id, &volume_path).await,
                CsiMessage::NodeVolumeExpanded,
            ),
            CsiMessage::NodeGetVolumeStats {
                volume_id,
                volume_path,
            } => reply(
                handler.get_volume_stats(&volume_id, &volume_path).await,
                CsiMessage::VolumeStatsResponse,
            ),
            CsiMessage::NodeGetCapabilities => reply(
                CsiNode::get_capabilities(handler).await,
                CsiMessage::NodeCapabilitiesResponse,
            ),
            CsiMessage::GetNodeInfo => {
                reply(handler.get_info().await, CsiMessage::NodeInfoResponse)
            }

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}
