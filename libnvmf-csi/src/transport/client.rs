//! QUIC client used by the orchestration caller to issue node requests.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::NodeError;
use crate::message::NodeMessage;

/// Upper bound on a single request or response payload.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Client side of the node transport.
///
/// Holds one QUIC connection to a node server; each request runs on its own
/// bi-directional stream, so calls may be issued concurrently from multiple
/// tasks sharing the client.
pub struct NodeClient {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
    peer: SocketAddr,
}

impl NodeClient {
    /// Connect to the node server at `addr`.
    ///
    /// `server_name` is the TLS SNI name and must match a SAN in the
    /// server's certificate.  The local endpoint binds to an unspecified
    /// port in the same address family as `addr`.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, NodeError> {
        let crypto = QuicClientConfig::try_from(tls_config)
            .map_err(|e| NodeError::Transport(format!("invalid TLS config: {e}")))?;

        let bind: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse().map_err(NodeError::internal)?
        } else {
            "0.0.0.0:0".parse().map_err(NodeError::internal)?
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(NodeError::transport)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(NodeError::transport)?
            .await
            .map_err(NodeError::transport)?;
        debug!(%addr, %server_name, "node QUIC connection established");

        Ok(Self {
            endpoint,
            connection,
            peer: addr,
        })
    }

    /// Send a request and return the raw response envelope, including
    /// [`NodeMessage::Error`] responses.
    #[instrument(skip(self), fields(peer = %self.peer, msg = %msg))]
    pub async fn request(&self, msg: &NodeMessage) -> Result<NodeMessage, NodeError> {
        let payload = serde_json::to_vec(msg).map_err(NodeError::internal)?;

        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(NodeError::transport)?;
        send.write_all(&payload)
            .await
            .map_err(NodeError::transport)?;
        send.finish().map_err(NodeError::transport)?;

        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(NodeError::transport)?;
        let response = serde_json::from_slice(&buf).map_err(NodeError::transport)?;
        debug!(%response, "node response received");
        Ok(response)
    }

    /// Like [`NodeClient::request`], but unwraps the envelope: a
    /// [`NodeMessage::Error`] response becomes the `Err` variant, so callers
    /// match only on success payloads.
    pub async fn call(&self, msg: &NodeMessage) -> Result<NodeMessage, NodeError> {
        match self.request(msg).await? {
            NodeMessage::Error(e) => Err(e),
            response => Ok(response),
        }
    }

    /// Address of the connected node server.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Close the connection and the local endpoint.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
