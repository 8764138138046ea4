//! rustls client configuration.
//!
//! Server chains are validated against the bundled WebPKI roots plus any
//! extra roots from [`TlsSettings`]. Every presented certificate is logged
//! (and handed to the optional inspector) before validation runs; untrusted
//! chains fail the handshake.

use std::fmt;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use super::TransferError;
use crate::config::{CertificateInspector, TlsSettings};

/// Logs and inspects each certificate, then defers to WebPKI validation.
struct InspectingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    inspector: Option<CertificateInspector>,
}

impl fmt::Debug for InspectingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectingVerifier")
            .field("inspector", &self.inspector.is_some())
            .finish_non_exhaustive()
    }
}

impl InspectingVerifier {
    fn observe(&self, depth: usize, cert: &CertificateDer<'_>) {
        debug!(depth, bytes = cert.as_ref().len(), "server certificate presented");
        if let Some(inspector) = &self.inspector {
            inspector(depth, cert);
        }
    }
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.observe(0, end_entity);
        for (i, cert) in intermediates.iter().enumerate() {
            self.observe(i + 1, cert);
        }
        let verdict =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        if let Err(error) = &verdict {
            warn!(server = ?server_name, %error, "certificate verification failed");
        }
        verdict
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Builds the client configuration for HTTPS targets.
///
/// # Errors
///
/// Returns [`TransferError::TlsConfig`] if an extra root is not a usable
/// trust anchor.
pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>, TransferError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    for cert in &settings.extra_roots {
        roots.add(cert.clone()).map_err(TransferError::TlsConfig)?;
    }
    debug!(
        anchors = roots.len(),
        extra = settings.extra_roots.len(),
        "trust store assembled"
    );

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| TransferError::TlsConfig(rustls::Error::General(e.to_string())))?;
    let verifier = InspectingVerifier {
        inner,
        inspector: settings.inspector.clone(),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(TransferError::TlsConfig)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Name presented in SNI and checked against the certificate.
///
/// # Errors
///
/// Returns [`TransferError::TlsHandshake`] if `host` is neither a DNS name
/// nor an IP address.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TransferError> {
    ServerName::try_from(host.to_string()).map_err(|e| {
        TransferError::tls_handshake(
            host,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })
}
