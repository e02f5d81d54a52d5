use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use x509_parser::parse_x509_certificate;
use x509_parser::time::ASN1Time;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

use super::CertificateProber;
use super::types::{CertificateDetails, CertificateOutcome, UNKNOWN_ISSUER};
use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("connection failed: invalid server name '{0}'")]
    InvalidName(String),
    #[error("connection failed: timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(std::io::Error),
    #[error("connection failed: TLS handshake: {0}")]
    Handshake(std::io::Error),
    #[error("failed to retrieve/parse certificate")]
    Certificate,
}

/// Accepts whatever chain the server presents.
///
/// The probe judges the validity window itself; chain-of-trust is not its
/// concern. Handshake signatures are still checked against the presented key.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// TLS certificate probe
pub struct CertificateProbe {
    connector: TlsConnector,
    clock: Arc<dyn Clock>,
}

impl CertificateProbe {
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth();

        Ok(Self { connector: TlsConnector::from(Arc::new(config)), clock })
    }

    async fn capture(
        &self,
        domain: &str,
        port: u16,
        limit: Duration,
    ) -> Result<CertificateDetails, CertificateError> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| CertificateError::InvalidName(domain.to_string()))?;

        // One deadline covers connect, handshake and close
        let deadline = Instant::now() + limit;

        let tcp = timeout_at(deadline, TcpStream::connect((domain, port)))
            .await
            .map_err(|_| CertificateError::Timeout(limit))?
            .map_err(CertificateError::Connect)?;

        let mut tls = timeout_at(deadline, self.connector.connect(server_name, tcp))
            .await
            .map_err(|_| CertificateError::Timeout(limit))?
            .map_err(CertificateError::Handshake)?;

        let leaf = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|cert| cert.as_ref().to_vec());

        // Best effort close_notify; the socket is dropped either way
        if let Ok(Err(e)) = timeout_at(deadline, tls.shutdown()).await {
            debug!(domain, port, error = %e, "TLS shutdown failed");
        }

        let der = leaf.ok_or(CertificateError::Certificate)?;
        parse_certificate(&der, self.clock.now())
    }
}

#[async_trait::async_trait]
impl CertificateProber for CertificateProbe {
    async fn check(&self, domain: &str, port: u16, timeout: Duration) -> CertificateOutcome {
        match self.capture(domain, port, timeout).await {
            Ok(details) => CertificateOutcome::Captured(details),
            Err(e) => {
                warn!(domain, port, error = %e, "Certificate check failed");
                CertificateOutcome::failed(e)
            }
        }
    }
}

/// Parse a DER leaf certificate and derive its state at `now`
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<CertificateDetails, CertificateError> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| {
        debug!(error = %e, "Failed to parse X.509 certificate");
        CertificateError::Certificate
    })?;

    let validity = cert.validity();
    let not_before = asn1_to_utc(&validity.not_before).ok_or(CertificateError::Certificate)?;
    let not_after = asn1_to_utc(&validity.not_after).ok_or(CertificateError::Certificate)?;

    Ok(CertificateDetails::evaluate(not_before, not_after, issuer_name(cert.issuer()), now))
}

fn asn1_to_utc(time: &ASN1Time) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0)
}

/// Organization, then common name, then "Unknown"
fn issuer_name(issuer: &X509Name<'_>) -> String {
    first_text(issuer.iter_organization())
        .or_else(|| first_text(issuer.iter_common_name()))
        .unwrap_or_else(|| UNKNOWN_ISSUER.to_string())
}

fn first_text<'r, 'a: 'r>(
    mut attrs: impl Iterator<Item = &'r AttributeTypeAndValue<'a>>,
) -> Option<String> {
    attrs.find_map(|attr| {
        let text = attr.as_str().ok()?.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}
