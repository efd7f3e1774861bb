//! Node configuration.
//!
//! The configuration is read once at process start and injected into the
//! node service as an immutable snapshot; nothing mutates it at runtime.
//!
//! Environment variables:
//! - `NVMF_CSI_NODE_CONFIG`: path to the JSON config file.
//!   Defaults to `/etc/nvmf-csi/node-config.json`.
//! - `NVMF_CSI_NODE_ID`: identifier of this node, appended to the subsystem
//!   NQN so every node exposes a distinct local target endpoint.
//!   Defaults to `node0`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::ctx;

/// Environment variable naming the config file path.
pub const CFG_PATH_ENV: &str = "NVMF_CSI_NODE_CONFIG";
/// Environment variable naming this node's identifier.
pub const NODE_ID_ENV: &str = "NVMF_CSI_NODE_ID";

const DEFAULT_CFG_PATH: &str = "/etc/nvmf-csi/node-config.json";
const DEFAULT_NODE_ID: &str = "node0";

/// Immutable node configuration snapshot.
///
/// The transport fields describe this node's *own* NVMe-oF endpoint.  When a
/// volume uses the shared transport path, the initiator connection parameters
/// are derived from these values rather than from the request, so a caller
/// cannot redirect the data plane to an arbitrary endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Node name, also reported via `get_info`.
    pub name: String,
    /// Subsystem NQN of this node's local target endpoint.  The node id is
    /// appended at load time.
    pub subnqn: String,
    /// NVMe-oF address family (`ipv4` / `ipv6`).
    pub transport_adrfam: String,
    /// NVMe-oF transport type (`tcp` / `rdma`).
    pub transport_type: String,
    /// Address the local target endpoint listens on.
    pub transport_addr: String,
    /// Service port of the local target endpoint.
    pub transport_port: String,
    /// Address of the storage-management control plane.
    pub sma_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_owned(),
            subnqn: "nqn.2024-01.io.csi.nvmf:".to_owned(),
            transport_adrfam: "ipv4".to_owned(),
            transport_type: "tcp".to_owned(),
            transport_addr: "127.0.0.1".to_owned(),
            transport_port: "4421".to_owned(),
            sma_addr: "127.0.0.1:50051".to_owned(),
        }
    }
}

impl NodeConfig {
    /// Load the configuration from a JSON file.
    ///
    /// A missing or malformed file is not fatal: defaults are used instead,
    /// with a warning.  `node_id` is appended to the subsystem NQN in either
    /// case.
    pub fn load(path: &Path, node_id: &str) -> Self {
        let mut cfg = match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Self>(&s).map_err(|e| e.to_string()))
        {
            Ok(cfg) => {
                info!(path = %path.display(), node_id, "loaded node config file");
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load node config file, using defaults");
                Self::default()
            }
        };
        cfg.subnqn.push_str(node_id);
        cfg
    }

    /// Load the configuration using the `NVMF_CSI_NODE_CONFIG` and
    /// `NVMF_CSI_NODE_ID` environment variables.
    pub fn from_env() -> Self {
        let path = std::env::var(CFG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CFG_PATH.to_owned());
        let node_id = std::env::var(NODE_ID_ENV).unwrap_or_else(|_| DEFAULT_NODE_ID.to_owned());
        Self::load(Path::new(&path), &node_id)
    }

    /// Build the initiator connection context for a volume on the shared
    /// transport path.
    ///
    /// Endpoint values come from this config; only the device-identifying
    /// `model` string is taken from the request context.
    pub fn initiator_context(&self, request_ctx: &HashMap<String, String>) -> HashMap<String, String> {
        let mut out = HashMap::from([
            (ctx::TARGET_TYPE.to_owned(), self.transport_type.clone()),
            (ctx::TARGET_ADDR.to_owned(), self.transport_addr.clone()),
            (ctx::TARGET_PORT.to_owned(), self.transport_port.clone()),
            (ctx::NQN.to_owned(), self.subnqn.clone()),
        ]);
        if let Some(model) = request_ctx.get(ctx::MODEL) {
            out.insert(ctx::MODEL.to_owned(), model.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_file_missing() {
        let cfg = NodeConfig::load(Path::new("/nonexistent/node-config.json"), "node7");
        assert_eq!(cfg.transport_type, "tcp");
        assert_eq!(cfg.transport_port, "4421");
        assert!(cfg.subnqn.ends_with("node7"));
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"name":"worker-1","transportAddr":"10.0.0.5","transportPort":"4430"}}"#
        )
        .unwrap();

        let cfg = NodeConfig::load(f.path(), "worker-1");
        assert_eq!(cfg.name, "worker-1");
        assert_eq!(cfg.transport_addr, "10.0.0.5");
        assert_eq!(cfg.transport_port, "4430");
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.transport_type, "tcp");
        assert!(cfg.subnqn.ends_with("worker-1"));
    }

    #[test]
    fn initiator_context_derives_from_config() {
        let cfg = NodeConfig::load(Path::new("/nonexistent"), "n1");
        let request_ctx = HashMap::from([
            (ctx::TARGET_ADDR.to_owned(), "6.6.6.6".to_owned()),
            (ctx::MODEL.to_owned(), "vol-model-1".to_owned()),
        ]);

        let out = cfg.initiator_context(&request_ctx);
        // The request must not be able to redirect the endpoint.
        assert_eq!(out.get(ctx::TARGET_ADDR).unwrap(), "127.0.0.1");
        assert_eq!(out.get(ctx::NQN).unwrap(), &cfg.subnqn);
        assert_eq!(out.get(ctx::MODEL).unwrap(), "vol-model-1");
    }
}
