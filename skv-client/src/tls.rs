//! # TLS Transport
//!
//! Wraps blocking TCP streams in a rustls client session. The rustls config is
//! built once per client from `TlsSettings` and shared by every dial.

use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use serde::{Deserialize, Serialize};

use skv_common::{SkvError, SkvResult};

/// Blocking TLS stream over TCP.
pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// TLS options as they appear in client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM file with CA certificates; webpki roots are used when unset.
    pub ca_cert_path: Option<PathBuf>,
    /// SNI / verification name; defaults to the host part of the address.
    pub server_name: Option<String>,
    /// Accept any server certificate.
    pub skip_verify: bool,
}

/// Shared rustls client configuration.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<rustls::ClientConfig>,
    server_name: Option<String>,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Builds the rustls config for the provided settings.
    pub fn new(settings: &TlsSettings) -> SkvResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| SkvError::Tls(e.to_string()))?;

        let config = if settings.skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(load_roots(settings)?)
                .with_no_client_auth()
        };

        Ok(TlsConnector {
            config: Arc::new(config),
            server_name: settings.server_name.clone(),
        })
    }

    /// Runs the handshake over an established TCP stream.
    ///
    /// The handshake is driven to completion here so certificate problems
    /// surface at dial time instead of on the first command.
    pub fn connect(&self, addr: &str, mut sock: TcpStream) -> SkvResult<TlsStream> {
        let host = match &self.server_name {
            Some(name) => name.clone(),
            None => host_of(addr).to_string(),
        };
        let name = ServerName::try_from(host)
            .map_err(|e| SkvError::Tls(format!("invalid server name: {}", e)))?;
        let mut conn = ClientConnection::new(self.config.clone(), name)
            .map_err(|e| SkvError::Tls(e.to_string()))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut sock)
                .map_err(|e| SkvError::Tls(format!("handshake failed: {}", e)))?;
        }

        Ok(StreamOwned::new(conn, sock))
    }
}

fn load_roots(settings: &TlsSettings) -> SkvResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match &settings.ca_cert_path {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| SkvError::Tls(format!("{}: {}", path.display(), e)))?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| SkvError::Tls(format!("{}: {}", path.display(), e)))?;
                roots
                    .add(cert)
                    .map_err(|e| SkvError::Tls(format!("failed to add CA: {}", e)))?;
            }
            if roots.is_empty() {
                return Err(SkvError::Tls(format!("{}: no certificates found", path.display())));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

/// Host part of `host:port` / `[v6]:port`.
pub(crate) fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, _)) => host,
        None => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_port_and_brackets() {
        assert_eq!(host_of("redis.internal:6379"), "redis.internal");
        assert_eq!(host_of("[::1]:6379"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[test]
    fn builds_with_webpki_roots() {
        let connector = TlsConnector::new(&TlsSettings::default()).unwrap();
        assert!(connector.server_name.is_none());
    }

    #[test]
    fn builds_with_skip_verify() {
        let settings = TlsSettings {
            skip_verify: true,
            server_name: Some("cache.local".to_string()),
            ..Default::default()
        };
        let connector = TlsConnector::new(&settings).unwrap();
        assert_eq!(connector.server_name.as_deref(), Some("cache.local"));
    }

    #[test]
    fn missing_ca_file_is_tls_error() {
        let settings = TlsSettings {
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(TlsConnector::new(&settings), Err(SkvError::Tls(_))));
    }
}
