//! `clap`-parsed CLI flags (`SPEC_FULL.md` §B "CLI/demo entry point"):
//! the minimal surface this core's demo binary needs, not a general
//! config-file loader.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ListenAddress, ServerConfig, TlsConfig, UserCredential};

#[derive(Debug, Parser)]
#[command(name = "fileport-server", about = "Demo entry point for the fileport core")]
pub struct Cli {
    /// `host:port` to listen on; may be repeated.
    #[arg(long = "listen", value_name = "HOST:PORT")]
    pub listen: Vec<String>,

    /// Directory served as the web UI's static assets.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub doc_root: PathBuf,

    /// `username:password` pairs accepted by the `/token` password
    /// grant; may be repeated.
    #[arg(long = "user", value_name = "USERNAME:PASSWORD")]
    pub users: Vec<String>,

    /// PEM certificate chain; enables TLS when given with `--tls-key`.
    #[arg(long, value_name = "PATH", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key; enables TLS when given with `--tls-cert`.
    #[arg(long, value_name = "PATH", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::default();

        if !self.listen.is_empty() {
            config.listen = self
                .listen
                .iter()
                .map(|s| parse_listen_address(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
        }

        config.doc_root = self.doc_root;

        config.users = self
            .users
            .iter()
            .map(|s| parse_user_credential(s))
            .collect::<anyhow::Result<Vec<_>>>()?;

        config.tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig { cert_path, key_path }),
            _ => None,
        };

        Ok(config)
    }
}

fn parse_listen_address(s: &str) -> anyhow::Result<ListenAddress> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("--listen value `{s}` is not HOST:PORT"))?;
    let port: u16 = port.parse().map_err(|_| anyhow::anyhow!("--listen port `{port}` is not a valid u16"))?;
    Ok(ListenAddress {
        host: host.to_string(),
        port,
    })
}

fn parse_user_credential(s: &str) -> anyhow::Result<UserCredential> {
    let (username, password) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("--user value `{s}` is not USERNAME:PASSWORD"))?;
    Ok(UserCredential {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_address_requires_a_port() {
        assert!(parse_listen_address("0.0.0.0").is_err());
        let addr = parse_listen_address("0.0.0.0:9000").unwrap();
        assert_eq!(addr.port, 9000);
    }

    #[test]
    fn ipv6_listen_address_splits_on_the_last_colon() {
        let addr = parse_listen_address("::1:9000").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 9000);
    }

    #[test]
    fn user_credential_requires_a_colon() {
        assert!(parse_user_credential("alice").is_err());
        let user = parse_user_credential("alice:correct").unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.password, "correct");
    }
}
