//! QUIC server that runs on each worker node and dispatches incoming
//! requests to a [`CsiNode`] implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::error::NodeError;
use crate::message::NodeMessage;
use crate::node::CsiNode;

/// Upper bound on a single request or response payload.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// A node server that accepts QUIC connections and dispatches
/// [`NodeMessage`] requests to a [`CsiNode`] implementation.
pub struct NodeServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> NodeServer<T>
where
    T: CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, NodeError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| NodeError::Transport(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint =
            quinn::Endpoint::server(server_config, addr).map_err(NodeError::transport)?;
        info!(%addr, "node QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently — lifecycle calls for
    /// different volumes proceed in parallel, contention on the same volume
    /// is resolved by the per-volume exclusion lock.
    pub async fn serve(&self) -> Result<(), NodeError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "node connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "node connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), NodeError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(NodeError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "node stream handler error");
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
    ) -> Result<(), NodeError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(NodeError::transport)?;

        let request: NodeMessage = serde_json::from_slice(&buf)
            .map_err(|e| NodeError::Transport(format!("malformed request: {e}")))?;

        debug!(%request, "node request received");

        let response = Self::dispatch(handler, request).await;

        let payload = serde_json::to_vec(&response).map_err(NodeError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(NodeError::transport)?;
        send.finish().map_err(NodeError::transport)?;
        Ok(())
    }

    /// Map a [`NodeMessage`] request to the correct trait method call and
    /// wrap the result in a response [`NodeMessage`].
    async fn dispatch(handler: &T, request: NodeMessage) -> NodeMessage {
        match request {
            NodeMessage::StageVolume(req) => match handler.stage_volume(req).await {
                Ok(()) => NodeMessage::Ok,
                Err(e) => NodeMessage::Error(e),
            },
            NodeMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => match handler
                .unstage_volume(&volume_id, &staging_target_path)
                .await
            {
                Ok(()) => NodeMessage::Ok,
                Err(e) => NodeMessage::Error(e),
            },
            NodeMessage::PublishVolume(req) => match handler.publish_volume(req).await {
                Ok(()) => NodeMessage::Ok,
                Err(e) => NodeMessage::Error(e),
            },
            NodeMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => match handler.unpublish_volume(&volume_id, &target_path).await {
                Ok(()) => NodeMessage::Ok,
                Err(e) => NodeMessage::Error(e),
            },
            NodeMessage::GetCapabilities => match handler.get_capabilities().await {
                Ok(caps) => NodeMessage::Capabilities(caps),
                Err(e) => NodeMessage::Error(e),
            },
            NodeMessage::GetNodeInfo => match handler.get_info().await {
                Ok(info) => NodeMessage::NodeInfoResponse(info),
                Err(e) => NodeMessage::Error(e),
            },

            // Response variants should never arrive as requests.
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                NodeMessage::Error(NodeError::InvalidArgument(format!(
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
