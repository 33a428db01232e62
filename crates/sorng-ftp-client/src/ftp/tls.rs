//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! - Builds one `rustls::ClientConfig` per session from the native roots,
//!   an optional extra CA bundle and the invalid-cert escape hatch.
//! - The same connector (and so the same session cache) secures every data
//!   connection, which lets servers that demand TLS session reuse on the
//!   data channel accept it.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::ftp::connection::{io_timeout, FtpStream};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpConnectionConfig;

/// Connector + verified name shared by the control and data channels.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsContext {
    /// Build the TLS context for a connection config.
    pub async fn from_config(config: &FtpConnectionConfig) -> FtpResult<Self> {
        let opts = &config.secure_options;
        let mut root_store = rustls::RootCertStore::empty();

        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            warn!("Skipping unreadable native certificate store entry: {}", err);
        }
        let (added, ignored) = root_store.add_parsable_certificates(native.certs);
        log::debug!("Loaded {} native root certificates ({} ignored)", added, ignored);

        if let Some(ref ca_path) = opts.ca_cert_path {
            let pem = tokio::fs::read(ca_path)
                .await
                .map_err(|e| FtpError::tls_failed(format!("Failed to read CA cert {}: {}", ca_path, e)))?;
            let mut cursor = Cursor::new(pem);
            for cert in rustls_pemfile::certs(&mut cursor) {
                let cert = cert
                    .map_err(|e| FtpError::tls_failed(format!("Invalid CA cert {}: {}", ca_path, e)))?;
                root_store
                    .add(cert)
                    .map_err(|e| FtpError::tls_failed(format!("Failed to add CA cert: {}", e)))?;
            }
        }

        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if opts.accept_invalid_certs {
            warn!("FTPS certificate verification disabled for {}", config.host);
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }

        let name = opts.server_name.clone().unwrap_or_else(|| config.host.clone());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| FtpError::tls_failed(format!("Invalid server name '{}': {}", name, e)))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }

    /// Perform the client handshake over an already connected socket.
    pub async fn wrap(
        &self,
        tcp: TcpStream,
        limit: Option<Duration>,
        what: &str,
    ) -> FtpResult<FtpStream> {
        let tls = io_timeout(limit, self.connector.connect(self.server_name.clone(), tcp))
            .await
            .map_err(|e| FtpError::tls_failed(format!("{} TLS handshake: {}", what, e)))?;
        Ok(FtpStream::Tls(Box::new(tls)))
    }
}

/// Upgrade a **plain** stream to TLS (after `AUTH TLS` → 234).
pub async fn upgrade_to_tls(
    stream: FtpStream,
    ctx: &TlsContext,
    limit: Option<Duration>,
) -> FtpResult<FtpStream> {
    match stream {
        FtpStream::Plain(tcp) => ctx.wrap(tcp, limit, "Explicit").await,
        FtpStream::Tls(_) => Err(FtpError::protocol_error(
            "Cannot upgrade: connection is already TLS",
        )),
    }
}

// ─── NoCertVerifier (for self-signed certs) ─────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
