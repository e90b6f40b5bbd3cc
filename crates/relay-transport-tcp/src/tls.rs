//! The `tls` security layer: wraps an accepted or dialed [`Conn`] in a
//! `rustls` session. Server-side certificate material is held behind an
//! `ArcSwap` so it can be rotated without tearing down the listener.
//! Client-side verification is driven by the [`CertificateMode`] carried
//! in [`TlsSettings`] on every dial.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_transport::conn::{BoxConn, Conn, FixedAddrConn};
use relay_transport::security::{SecurityLayer, SecuritySettings};
use relay_transport::settings::{CertificateMode, TlsSettings};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{self, map_io_error};

/// Server-side certificate material for the `tls` security layer,
/// swappable at runtime. Construct once per listener and keep a clone
/// around to call [`Self::replace`] when certificates are renewed.
pub struct TlsSecurityLayer {
    server_config: Option<ArcSwap<ServerConfig>>,
    client_roots: Arc<RootCertStore>,
}

impl TlsSecurityLayer {
    /// Builds a layer usable for dialing only (`wrap_accepted` will fail).
    pub fn client_only(roots: RootCertStore) -> Self {
        Self {
            server_config: None,
            client_roots: Arc::new(roots),
        }
    }

    /// Builds a layer usable for both accepting and dialing.
    pub fn with_server_identity(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        alpn_protocols: Vec<Vec<u8>>,
        roots: RootCertStore,
    ) -> Result<Self, CoreError> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| map_io_error(error::TLS_HANDSHAKE, std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        config.alpn_protocols = alpn_protocols;
        Ok(Self {
            server_config: Some(ArcSwap::new(Arc::new(config))),
            client_roots: Arc::new(roots),
        })
    }

    /// Rotates the server certificate in place; connections already
    /// mid-handshake keep the config snapshot they started with.
    pub fn replace_server_identity(&self, config: ServerConfig) -> Result<(), CoreError> {
        let slot = self.server_config.as_ref().ok_or_else(|| {
            map_io_error(
                error::TLS_HANDSHAKE,
                std::io::Error::new(std::io::ErrorKind::Unsupported, "layer has no server identity to rotate"),
            )
        })?;
        slot.store(Arc::new(config));
        Ok(())
    }

    fn client_config(&self, settings: &TlsSettings) -> Result<ClientConfig, CoreError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder();
        let mut config = if settings.allow_insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier { provider }))
                .with_no_client_auth()
        } else {
            match &settings.certificate_mode {
                CertificateMode::Pinned { chain_sha256 } => builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(PinnedSha256Verifier {
                        provider,
                        pinned: chain_sha256.clone(),
                    }))
                    .with_no_client_auth(),
                CertificateMode::AuthorityIssue | CertificateMode::AuthorityVerify => builder
                    .with_root_certificates((*self.client_roots).clone())
                    .with_no_client_auth(),
            }
        };
        config.alpn_protocols = settings.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(config)
    }
}

#[async_trait]
impl SecurityLayer for TlsSecurityLayer {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn wrap_accepted(&self, conn: BoxConn, _settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        let slot = self.server_config.as_ref().ok_or_else(|| {
            map_io_error(
                error::TLS_HANDSHAKE,
                std::io::Error::new(std::io::ErrorKind::Unsupported, "layer has no server identity configured"),
            )
        })?;
        let peer = conn.peer_addr();
        let local = conn.local_addr();
        let acceptor = TlsAcceptor::from(slot.load_full());
        let stream = acceptor.accept(conn).await.map_err(|e| map_io_error(error::TLS_HANDSHAKE, e))?;
        Ok(Box::new(FixedAddrConn::new(stream, peer, local)))
    }

    async fn wrap_dial(&self, conn: BoxConn, settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        let SecuritySettings::Tls(tls_settings) = settings else {
            return Err(map_io_error(
                error::TLS_HANDSHAKE,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "tls layer requires SecuritySettings::Tls"),
            ));
        };
        let peer = conn.peer_addr();
        let local = conn.local_addr();
        let config = self.client_config(tls_settings)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(tls_settings.server_name.clone())
            .map_err(|e| map_io_error(error::TLS_HANDSHAKE, std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let stream = connector
            .connect(server_name, conn)
            .await
            .map_err(|e| map_io_error(error::TLS_HANDSHAKE, e))?;
        Ok(Box::new(FixedAddrConn::new(stream, peer, local)))
    }
}

/// Verifier backing [`TlsSettings::allow_insecure`]: accepts any chain.
/// Never selected unless the caller explicitly opts out of verification.
#[derive(Debug)]
struct AcceptAnyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyVerifier {
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

/// Verifier backing [`CertificateMode::Pinned`]: skips chain-of-trust
/// validation entirely and instead checks the leaf certificate's SHA-256
/// fingerprint against a known-good set, the REALITY-adjacent "pinned
/// leaf" trust model used when there is no public CA to rely on.
#[derive(Debug)]
struct PinnedSha256Verifier {
    provider: Arc<CryptoProvider>,
    pinned: Vec<[u8; 32]>,
}

impl ServerCertVerifier for PinnedSha256Verifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let digest: [u8; 32] = Sha256::digest(end_entity.as_ref()).into();
        if self.pinned.iter().any(|p| p == &digest) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("certificate does not match any pinned fingerprint".into()))
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_verifier_rejects_unknown_digest() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedSha256Verifier {
            provider,
            pinned: vec![[0u8; 32]],
        };
        let bogus = CertificateDer::from(vec![1, 2, 3, 4]);
        let name = ServerName::try_from("example.com").unwrap();
        let result = verifier.verify_server_cert(&bogus, &[], &name, &[], UnixTime::now());
        assert!(result.is_err());
    }
}
