use relay_core::{RelayError, RelayResult};
use relay_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Contents of `relay.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Working copy the version-control hooks operate on. Hooks are off when unset.
#[derive(Debug, Default, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_git_timeout_secs() -> u64 {
    60
}

impl RelayConfig {
    /// Parse a TOML document.
    pub fn parse(text: &str) -> RelayResult<Self> {
        toml::from_str(text).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Load `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> RelayResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text)
                .map_err(|e| RelayError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn socket_addr(&self, host: Option<&str>, port: Option<u16>) -> RelayResult<SocketAddr> {
        let host = host.unwrap_or(&self.server.host);
        let port = port.unwrap_or(self.server.port);
        format!("{host}:{port}")
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address {host}:{port}: {e}")))
    }
}
