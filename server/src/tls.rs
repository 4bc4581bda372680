//! Loads a `rustls::ServerConfig` from a PEM cert chain and private
//! key (`SPEC_FULL.md` §B "TLS"); certificate *management* (ACME,
//! rotation) stays out of scope (`SPEC_FULL.md` §D) — this only turns
//! two files on disk into a handshake config, offering `http/1.1` over
//! ALPN per `spec.md` §6.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

pub fn load(cert_path: &Path, key_path: &Path) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let cert_file = File::open(cert_path).with_context(|| format!("opening {}", cert_path.display()))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .with_context(|| format!("parsing certificates from {}", cert_path.display()))?;

    let key_file = File::open(key_path).with_context(|| format!("opening {}", key_path.display()))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("parsing private key from {}", key_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
