// SPDX-License-Identifier: Apache-2.0

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{pem::PemObject, CertificateDer, ServerName, UnixTime};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use super::SinkError;
use crate::config::TlsConfig;

/// Build a rustls client config from the sink's TLS settings: platform roots
/// by default, a pinned CA when configured, or no verification at all when
/// `insecure_skip_verify` is set.
///
/// The provider is passed explicitly so no process-global crypto provider
/// needs to be installed before the first connection.
pub fn client_config(tls: &TlsConfig) -> Result<ClientConfig, SinkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SinkError::Request(format!("TLS protocol setup failed: {}", e)))?;

    let config = if tls.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new())
            .with_no_client_auth()
    } else if let Some(ca_file) = &tls.ca_file {
        let cert = CertificateDer::from_pem_file(ca_file)
            .map_err(|e| SinkError::Request(format!("cannot load CA file: {}", e)))?;
        let mut roots = RootCertStore::empty();
        roots
            .add(cert)
            .map_err(|e| SinkError::Request(format!("cannot add CA certificate: {}", e)))?;
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        let roots = rustls_native_roots()?;
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(config)
}

fn rustls_native_roots() -> Result<RootCertStore, SinkError> {
    let mut roots = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for cert in result.certs {
        let _ = roots.add(cert);
    }
    if roots.is_empty() {
        // Plain-HTTP destinations never touch the store; HTTPS ones will
        // fail the handshake and surface through the sink's retry path.
        tracing::warn!("No usable native root certificates were found");
    }
    Ok(roots)
}

// Accepts any server certificate. Only reachable through the explicit
// insecure_skip_verify switch.
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Debug for SkipServerVerification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SkipServerVerification")
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
