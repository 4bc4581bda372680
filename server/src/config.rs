//! A typed, serde-deserializable configuration surface (`SPEC_FULL.md`
//! §B "Configuration"): the config-file *format* is out of scope
//! (`SPEC_FULL.md` §D), so nothing here parses TOML/YAML/etc — the CLI
//! in [`crate::cli`] builds a [`ServerConfig`] directly from flags. The
//! struct stays serde-deserializable so an embedder can still feed it
//! one from wherever they like.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

/// Mirrors [`fileport_http::file_server::FileServerOptions`] in
/// serde-friendly form; converted at startup since the handler's own
/// type has no derives to spare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileServerConfig {
    pub can_get: bool,
    pub can_put: bool,
    pub can_delete: bool,
    pub can_post: bool,
    pub can_list_dir: bool,
    pub honor_406: bool,
    pub default_index: Vec<String>,
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            can_get: true,
            can_put: false,
            can_delete: false,
            can_post: false,
            can_list_dir: false,
            honor_406: false,
            default_index: vec!["index.html".to_string()],
        }
    }
}

impl From<FileServerConfig> for fileport_http::file_server::FileServerOptions {
    fn from(c: FileServerConfig) -> Self {
        Self {
            can_get: c.can_get,
            can_put: c.can_put,
            can_delete: c.can_delete,
            can_post: c.can_post,
            can_list_dir: c.can_list_dir,
            honor_406: c.honor_406,
            default_index: c.default_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Vec<ListenAddress>,
    pub tls: Option<TlsConfig>,
    pub doc_root: PathBuf,
    pub users: Vec<UserCredential>,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub activity_timeout_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub webui: FileServerConfig,
    pub files: FileServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec![ListenAddress {
                host: "0.0.0.0".to_string(),
                port: 8080,
            }],
            tls: None,
            doc_root: PathBuf::from("."),
            users: Vec::new(),
            access_token_ttl_secs: 5 * 60,
            refresh_token_ttl_secs: 15 * 24 * 60 * 60,
            activity_timeout_secs: 60,
            keepalive_timeout_secs: 300,
            webui: FileServerConfig {
                can_list_dir: false,
                ..FileServerConfig::default()
            },
            files: FileServerConfig {
                can_put: true,
                can_delete: true,
                can_post: true,
                can_list_dir: true,
                default_index: Vec::new(),
                ..FileServerConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_round_trip() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.listen, config.listen);
    }
}
