//! Configuration for the dev server and the client runtime.
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file is fine.
//!
//! ```toml
//! [server]
//! port = 8080
//! root = "public"
//!
//! [client]
//! origin = "http://localhost:8080"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HmrError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "hmr.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmrConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served to clients and watched for changes
    pub root: PathBuf,
    pub debounce_ms: u64,
    /// Directory names never reported as module changes
    pub ignored: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            root: PathBuf::from("."),
            debounce_ms: 50,
            ignored: [".git", "target", "node_modules", ".dx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin the page (and its modules) are served from
    pub origin: String,
    /// Explicit socket endpoint; derived from `origin` when unset
    pub socket_url: Option<String>,
    /// Hosts on which hot contexts are installed
    pub dev_hosts: Vec<String>,
    pub connect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            socket_url: None,
            dev_hosts: vec!["localhost".to_string()],
            connect_attempts: 5,
        }
    }
}

impl ClientConfig {
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).map_err(|e| HmrError::invalid_url(&self.origin, e))
    }

    /// The override when set, otherwise `ws://` (or `wss://` for anything but
    /// plain http) on the origin's host with path `/`.
    pub fn socket_url(&self) -> Result<Url> {
        if let Some(url) = &self.socket_url {
            return Url::parse(url).map_err(|e| HmrError::invalid_url(url, e));
        }

        let origin = self.origin_url()?;
        let scheme = if origin.scheme() == "http" { "ws" } else { "wss" };
        let host = origin
            .host_str()
            .ok_or_else(|| HmrError::Config(format!("origin `{}` has no host", self.origin)))?;
        let authority = match origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let url = format!("{scheme}://{authority}/");
        Url::parse(&url).map_err(|e| HmrError::invalid_url(url, e))
    }

    pub fn is_dev_host(&self) -> bool {
        match self.origin_url() {
            Ok(origin) => origin
                .host_str()
                .is_some_and(|host| self.dev_hosts.iter().any(|h| h == host)),
            Err(_) => false,
        }
    }
}

impl HmrConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HmrError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` when given, else `hmr.toml` if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HmrConfig::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.client.connect_attempts, 5);
        assert!(config.client.is_dev_host());
    }

    #[test]
    fn test_partial_toml() {
        let config = HmrConfig::from_toml(
            r#"
[server]
port = 9000

[client]
origin = "https://app.example.com"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.debounce_ms, 50);
        assert!(!config.client.is_dev_host());
    }

    #[test]
    fn test_invalid_toml() {
        let err = HmrConfig::from_toml("[server]\nport = \"eighty\"").unwrap_err();
        assert!(matches!(err, HmrError::Config(_)));
    }

    #[test]
    fn test_socket_url_derivation() {
        let mut client = ClientConfig {
            origin: "http://localhost:3000".into(),
            ..Default::default()
        };
        assert_eq!(client.socket_url().unwrap().as_str(), "ws://localhost:3000/");

        client.origin = "https://dev.example.com/app/index.html".into();
        assert_eq!(client.socket_url().unwrap().as_str(), "wss://dev.example.com/");

        client.socket_url = Some("ws://127.0.0.1:9999/hmr".into());
        assert_eq!(client.socket_url().unwrap().as_str(), "ws://127.0.0.1:9999/hmr");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hmr.toml");
        std::fs::write(&path, "[client]\ndev_hosts = [\"127.0.0.1\"]\norigin = \"http://127.0.0.1:1\"\n").unwrap();

        let config = HmrConfig::load_or_default(Some(&path)).unwrap();
        assert!(config.client.is_dev_host());
        assert!(HmrConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
