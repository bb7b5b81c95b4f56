//! Server configuration loaded from the environment

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind (WORLDSYNC_HOST)
    pub host: IpAddr,
    /// TCP port (WORLDSYNC_PORT)
    pub port: u16,
    /// Directory served under /static (WORLDSYNC_STATIC_DIR)
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl ServerConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = parse_var("WORLDSYNC_HOST").unwrap_or(defaults.host);
        let port = parse_var("WORLDSYNC_PORT").unwrap_or(defaults.port);
        let static_dir = std::env::var("WORLDSYNC_STATIC_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        let config = Self {
            host,
            port,
            static_dir,
        };
        tracing::info!(
            host = %config.host,
            port = config.port,
            static_dir = %config.static_dir.display(),
            "Server config loaded"
        );
        config
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Read and parse an env var. Unset yields `None`; unparsable values are
/// logged and also yield `None`.
fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, value = %raw, "Ignoring invalid value");
            None
        }
    }
}
