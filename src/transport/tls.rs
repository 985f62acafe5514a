//! TLS client setup.
//!
//! Builds a [`TlsConnector`] from [`TlsOptions`]:
//!
//! | `trust_all` | `verify_host` | Verification |
//! |-------------|---------------|--------------|
//! | `true` | any | none, any certificate is accepted |
//! | `false` | `true` | webpki roots + trust store, host name checked |
//! | `false` | `false` | webpki roots + trust store, host name ignored |
//!
//! If no crypto provider is installed process-wide, *ring* is used.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::client::options::TlsOptions;
use crate::error::{Error, Result};

// ============================================================================
// Connector
// ============================================================================

/// Builds a TLS connector for the given options.
///
/// # Errors
///
/// - [`Error::Config`] if the trust store cannot be read or holds no certificates
/// - [`Error::Tls`] if rustls rejects the configuration
pub fn connector(options: &TlsOptions) -> Result<TlsConnector> {
    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let mut config = if options.trust_all {
        warn!("TLS certificate verification disabled (trust_all)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TrustAllVerifier { provider }))
            .with_no_client_auth()
    } else {
        let roots = Arc::new(root_store(options)?);
        if options.verify_host {
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
                .build()
                .map_err(|e| Error::config(format!("Invalid TLS trust configuration: {e}")))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(IgnoreHostnameVerifier { inner }))
                .with_no_client_auth()
        }
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Runs the TLS handshake over an established stream.
///
/// # Errors
///
/// Returns [`Error::TlsHandshakeFailed`] if the host is not a valid server
/// name or the handshake fails.
pub async fn handshake<S>(connector: &TlsConnector, host: &str, stream: S) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::tls_handshake(format!("Invalid server name: {host}")))?;

    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::tls_handshake(e.to_string()))?;

    debug!(host, "TLS handshake completed");
    Ok(stream)
}

/// webpki roots plus the certificates of the configured trust store.
fn root_store(options: &TlsOptions) -> Result<RootCertStore> {
    let mut store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = &options.trust_store {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| Error::config(format!("Cannot read trust store {}: {e:?}", path.display())))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::config(format!("Invalid trust store {}: {e:?}", path.display())))?;

        if certs.is_empty() {
            return Err(Error::config(format!(
                "Trust store {} contains no certificates",
                path.display()
            )));
        }

        let (added, ignored) = store.add_parsable_certificates(certs);
        debug!(added, ignored, path = %path.display(), "Loaded trust store");
    }

    Ok(store)
}

// ============================================================================
// Verifiers
// ============================================================================

/// Accepts every certificate; signatures are still checked.
#[derive(Debug)]
struct TrustAllVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Full chain verification that tolerates a host name mismatch.
#[derive(Debug)]
struct IgnoreHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for IgnoreHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
