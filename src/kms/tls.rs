//! TLS configuration for the KMS client.
//!
//! By default the client skips server certificate verification entirely,
//! matching the ground-truth daemon's `InsecureSkipVerify: true`, so that it
//! can talk to lab QKD KMS appliances presenting self-signed or otherwise
//! unvalidatable certificate chains. `KMS_STRICT_TLS=true` switches to the
//! standard WebPKI chain-and-hostname verifier for deployments where the KMS
//! presents a CA-signed certificate.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::PrivateKeyDer;

use crate::config::Config;

/// Accepts any server certificate chain without validating it against a
/// trust root or checking the presented name against the connection
/// hostname. TLS handshake signatures are still cryptographically verified
/// against the certificate's public key, so this only disables the *chain
/// of trust* check, matching `InsecureSkipVerify: true` on the Go side, not
/// the handshake itself.
#[derive(Debug)]
pub struct InsecureServerVerifier {
    provider: Arc<CryptoProvider>,
}

impl InsecureServerVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        debug!("skipping KMS server certificate verification (see module docs)");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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

pub fn build_rustls_config(cfg: &Config) -> Result<ClientConfig> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let mut roots = RootCertStore::empty();
    if let Some(identity) = &cfg.tls_identity {
        let ca = CertificateDer::from_pem_file(&identity.ca_certificate).with_context(|| {
            format!(
                "failed to read CA certificate from {:?}",
                identity.ca_certificate
            )
        })?;
        roots
            .add(ca)
            .context("failed to add CA certificate to trust root store")?;
    } else {
        // No CA configured: fall back to the common web trust roots so the
        // strict verifier (if selected) still works against a properly
        // chained KMS. Irrelevant in the default insecure mode below.
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    let roots = Arc::new(roots);

    let builder = ClientConfig::builder().with_root_certificates(roots.clone());

    let mut config = match &cfg.tls_identity {
        Some(identity) => {
            let cert = CertificateDer::from_pem_file(&identity.certificate).with_context(|| {
                format!(
                    "failed to read client certificate from {:?}",
                    identity.certificate
                )
            })?;
            let key = PrivateKeyDer::from_pem_file(&identity.private_key).with_context(|| {
                format!("failed to read client key from {:?}", identity.private_key)
            })?;
            builder.with_client_auth_cert(vec![cert], key)?
        }
        None => builder.with_no_client_auth(),
    };

    if cfg.kms_strict_tls {
        debug!("KMS TLS client using strict chain and hostname verification");
    } else {
        warn!("KMS TLS client skips server certificate verification (KMS_STRICT_TLS=false); see module docs");
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureServerVerifier::new(provider)));
    }

    Ok(config)
}
