//! TLS termination for the front door.
//!
//! Loads a PEM certificate chain and private key into a
//! `rustls::ServerConfig` and wraps it in an acceptor for incoming
//! connections.

use pki_types::CertificateDer;
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Loads a TLS `ServerConfig` from the given certificate and key paths.
pub fn load_tls_config<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
) -> Result<Arc<ServerConfig>, Box<dyn std::error::Error + Send + Sync>> {
    let cert_file = File::open(cert_path.as_ref())?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(format!("no certificate found in {}", cert_path.as_ref().display()).into());
    }

    let key_file = File::open(key_path.as_ref())?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| format!("no private key found in {}", key_path.as_ref().display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // The front door serves HTTP/1.1 only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Builds an acceptor from the certificate and key paths.
pub fn load_tls_acceptor<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
) -> Result<TlsAcceptor, Box<dyn std::error::Error + Send + Sync>> {
    Ok(TlsAcceptor::from(load_tls_config(cert_path, key_path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_errors() {
        let missing = std::env::temp_dir().join("sluice-no-such-cert.pem");
        assert!(load_tls_config(&missing, &missing).is_err());
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        let path = std::env::temp_dir().join(format!("sluice-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a pem file\n").unwrap();
        let err = load_tls_config(&path, &path).unwrap_err();
        assert!(err.to_string().contains("no certificate"), "{err}");
        let _ = std::fs::remove_file(&path);
    }
}
