//! Node and master configuration, loadable from `~/.rosnet/config.toml`.
//!
//! ```toml
//! [node]
//! name = "/talker"
//! master_uri = "http://127.0.0.1:11311/"
//!
//! [node.remappings]
//! chatter = "/robot/chatter"
//!
//! [master]
//! port = 11311
//! ```

use crate::error::{NameError, RosResult};
use crate::name::GraphName;
use crate::topic::parse_uri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Default port of the master's control endpoint.
pub const DEFAULT_MASTER_PORT: u16 = 11311;

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosnetConfig {
    pub node: NodeConfig,
    pub master: MasterConfig,
}

/// Everything a node needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Global node name.
    pub name: String,
    /// Control endpoint of the master.
    pub master_uri: String,
    /// Host advertised to peers for both the control and data endpoints.
    pub host: String,
    /// Control endpoint port (0 picks a free port).
    pub rpc_port: u16,
    /// Data endpoint port (0 picks a free port).
    pub tcpros_port: u16,
    /// Name remappings applied before resolution.
    pub remappings: HashMap<String, String>,
    /// Whether service clients keep their connection open between calls.
    pub persistent_services: bool,
    /// Timeout for control protocol calls.
    pub rpc_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "/rosnet_node".to_string(),
            master_uri: format!("http://127.0.0.1:{DEFAULT_MASTER_PORT}/"),
            host: "127.0.0.1".to_string(),
            rpc_port: 0,
            tcpros_port: 0,
            remappings: HashMap::new(),
            persistent_services: true,
            rpc_timeout_secs: 10,
        }
    }
}

impl NodeConfig {
    /// Defaults with the given node name and master URI.
    pub fn new(name: impl Into<String>, master_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            master_uri: master_uri.into(),
            ..Self::default()
        }
    }

    pub fn master_url(&self) -> RosResult<Url> {
        parse_uri(&self.master_uri)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// The remapping table with both sides parsed as graph names.
    pub fn remapping_table(&self) -> Result<HashMap<GraphName, GraphName>, NameError> {
        self.remappings
            .iter()
            .map(|(from, to)| Ok((GraphName::new(from)?, GraphName::new(to)?)))
            .collect()
    }
}

/// Where a master listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MASTER_PORT,
        }
    }
}

impl MasterConfig {
    pub fn uri(&self) -> RosResult<Url> {
        parse_uri(&format!("http://{}:{}/", self.host, self.port))
    }
}

/// Default config location: `~/.rosnet/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".rosnet")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> RosnetConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return RosnetConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<RosnetConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                RosnetConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            RosnetConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.master_uri, "http://127.0.0.1:11311/");
        assert_eq!(config.rpc_port, 0);
        assert!(config.persistent_services);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(10));
        assert_eq!(MasterConfig::default().port, 11311);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.node.name, "/rosnet_node");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[node]\nname = \"/talker\"\n\n[node.remappings]\nchatter = \"/robot/chatter\"\n\n[master]\nport = 12000"
        )
        .unwrap();
        let config = load_config(Some(file.path()));
        assert_eq!(config.node.name, "/talker");
        assert_eq!(config.node.host, "127.0.0.1");
        assert_eq!(config.master.port, 12000);

        let table = config.node.remapping_table().unwrap();
        assert_eq!(
            table.get(&GraphName::new("chatter").unwrap()),
            Some(&GraphName::new("/robot/chatter").unwrap())
        );
    }

    #[test]
    fn test_load_malformed_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[node\nname = ").unwrap();
        let config = load_config(Some(file.path()));
        assert_eq!(config.master.port, DEFAULT_MASTER_PORT);
    }

    #[test]
    fn test_master_uri() {
        let config = MasterConfig {
            host: "localhost".to_string(),
            port: 11411,
        };
        assert_eq!(config.uri().unwrap().as_str(), "http://localhost:11411/");
    }
}
