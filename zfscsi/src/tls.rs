//! TLS material for the QUIC endpoint.
//!
//! QUIC only runs over TLS 1.3, so both configs are restricted to it and use
//! the `ring` provider explicitly.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn reader(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(BufReader::new(file))
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut reader(path)?)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut reader(path)?)
        .with_context(|| format!("parse private key in {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}

pub fn server_config(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(load_certs(cert)?, load_key(key)?)
        .context("build server TLS config")
}

/// Client config trusting the certificates in `trust`.
pub fn client_config(trust: &Path) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(trust)? {
        roots.add(cert).context("add trusted certificate")?;
    }
    Ok(rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let cert = dir.join("tls.crt");
        let key = dir.join("tls.key");
        std::fs::write(&cert, certified.cert.pem()).unwrap();
        std::fs::write(&key, certified.key_pair.serialize_pem()).unwrap();
        (cert, key)
    }

    #[test]
    fn loads_generated_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(tmp.path());
        assert_eq!(load_certs(&cert).unwrap().len(), 1);
        server_config(&cert, &key).unwrap();
        client_config(&cert).unwrap();
    }

    #[test]
    fn empty_pem_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();
        assert!(load_certs(&empty).is_err());
        assert!(load_key(&empty).is_err());
    }

    #[test]
    fn missing_file() {
        let err = load_certs(Path::new("/nonexistent/tls.crt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tls.crt"));
    }
}
