//! TLS helpers for explicit FTPS (RFC 4217).
//!
//! - Builds a rustls `ClientConfig` from the platform trust store, with an
//!   opt-in verifier that accepts self-signed certificates.
//! - `upgrade_to_tls` secures the control channel after `AUTH TLS` / 234.
//! - `wrap_data_stream` secures a data channel with the same config, so
//!   the server sees a resumed session.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use lazy_static::lazy_static;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

lazy_static! {
    static ref NATIVE_ROOTS: Arc<RootCertStore> = Arc::new(load_native_roots());
}

fn load_native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        log::warn!("Skipping platform certificate source: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    log::debug!("Loaded {} platform root certificates ({} ignored)", added, ignored);
    roots
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the client config shared by control and data channels.
pub fn build_client_config(accept_invalid_certs: bool) -> FtpResult<Arc<ClientConfig>> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| FtpError::tls_failed(format!("TLS setup: {}", e)))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(NATIVE_ROOTS.clone())
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

fn server_name(host: &str) -> FtpResult<ServerName<'static>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_string())
        .map_err(|e| FtpError::tls_failed(format!("Invalid TLS server name '{}': {}", host, e)))
}

/// Upgrade an existing **plain** control connection to TLS.
///
/// Consumes the plain codec, performs the handshake, returns a new codec.
pub async fn upgrade_to_tls(
    codec: FtpCodec,
    host: &str,
    config: Arc<ClientConfig>,
) -> FtpResult<FtpCodec> {
    let (tcp, reply_timeout) = codec.into_plain()?;
    let tls = TlsConnector::from(config)
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Explicit TLS handshake: {}", e)))?;
    Ok(FtpCodec::from_tls(tls, reply_timeout))
}

/// Create a TLS-wrapped data channel (PROT P).
pub async fn wrap_data_stream(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> FtpResult<TlsStream<TcpStream>> {
    TlsConnector::from(config)
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Data channel TLS: {}", e)))
}

/// Skips chain and hostname checks but still verifies handshake
/// signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
