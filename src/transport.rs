//! QUIC endpoint construction
//!
//! Builds the listening endpoint from a [`Credential`] and the connecting
//! endpoint with certificate verification turned off. Both sides pin the
//! `ring` crypto provider and TLS 1.3.

use crate::credential::Credential;
use crate::{Error, Result};
use log::{debug, warn};
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ClientConfig, Connection, Endpoint, ServerConfig, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// ALPN token negotiated by both roles.
pub const ALPN: &[u8] = b"quic-duplex";

/// Upper bound on waiting for a closed connection to finish draining.
///
/// Draining normally ends after three probe timeouts; this only guards
/// against a peer that never stops sending.
pub const CLOSE_GRACE: Duration = Duration::from_secs(3);

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the QUIC server configuration presenting `credential`.
pub fn server_config(credential: &Credential) -> Result<ServerConfig> {
    let mut tls = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(credential.cert_chain(), credential.private_key())?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicServerConfig::try_from(tls)
        .map_err(|e| Error::Crypto(format!("QUIC server config error: {}", e)))?;
    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

/// Builds the QUIC client configuration.
///
/// The listener's certificate is accepted without verification. This is a
/// trust shortcut for a test harness and offers no protection against an
/// active attacker.
pub fn insecure_client_config() -> Result<ClientConfig> {
    let provider = crypto_provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicClientConfig::try_from(tls)
        .map_err(|e| Error::Crypto(format!("QUIC client config error: {}", e)))?;
    Ok(ClientConfig::new(Arc::new(crypto)))
}

/// Binds a listening endpoint on `addr`.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the UDP socket cannot be bound, for example
/// because another listener already owns the address.
pub fn bind_listener(addr: SocketAddr, credential: &Credential) -> Result<Endpoint> {
    let config = server_config(credential)?;
    let endpoint =
        Endpoint::server(config, addr).map_err(|source| Error::Bind { addr, source })?;
    debug!("QUIC endpoint bound to {}", addr);
    Ok(endpoint)
}

/// Creates a client-only endpoint suitable for reaching `remote`.
///
/// The local socket uses the wildcard address of the same family as `remote`.
pub fn client_endpoint(remote: SocketAddr) -> Result<Endpoint> {
    let local: SocketAddr = if remote.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let mut endpoint =
        Endpoint::client(local).map_err(|source| Error::Bind { addr: local, source })?;
    endpoint.set_default_client_config(insecure_client_config()?);
    warn!("Server certificate verification is disabled");
    Ok(endpoint)
}

/// Closes `connection` with application code 0 and keeps `endpoint` serving
/// until the connection has drained, at most [`CLOSE_GRACE`].
///
/// While draining, the endpoint answers late packets from the peer with the
/// close frame again, so a lost close does not leave the peer waiting for its
/// idle timeout.
pub async fn close_connection(endpoint: &Endpoint, connection: &Connection, reason: &[u8]) {
    connection.close(VarInt::from_u32(0), reason);
    if time::timeout(CLOSE_GRACE, endpoint.wait_idle()).await.is_err() {
        debug!(
            "Close to {} not confirmed within {:?}",
            connection.remote_address(),
            CLOSE_GRACE
        );
    }
}

/// Resolves a `host:port` string to the first matching socket address.
pub async fn resolve(target: &str) -> Result<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host(target)
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", target, e)))?
        .next()
        .ok_or_else(|| Error::Resolve(format!("{}: no addresses found", target)))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
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
            &self.0.signature_verification_algorithms,
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
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::generate_credential;
    use crate::KeyAlgorithm;

    #[test]
    fn test_server_config_for_each_algorithm() {
        for algorithm in [
            KeyAlgorithm::EcdsaP256,
            KeyAlgorithm::EcdsaP384,
            KeyAlgorithm::Ed25519,
        ] {
            let credential = generate_credential(algorithm).unwrap();
            assert!(server_config(&credential).is_ok(), "{:?}", algorithm);
        }
    }

    #[test]
    fn test_client_config_builds() {
        assert!(insecure_client_config().is_ok());
    }

    #[tokio::test]
    async fn test_resolve_literal_and_hostname() {
        let addr = resolve("127.0.0.1:4242").await.unwrap();
        assert_eq!(addr.port(), 4242);

        let addr = resolve("localhost:4243").await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4243);
    }

    #[tokio::test]
    async fn test_resolve_rejects_garbage() {
        assert!(matches!(
            resolve("not an address").await,
            Err(Error::Resolve(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_listener_reports_address_in_use() {
        let credential = generate_credential(KeyAlgorithm::EcdsaP256).unwrap();
        let first = bind_listener("127.0.0.1:0".parse().unwrap(), &credential).unwrap();
        let addr = first.local_addr().unwrap();

        match bind_listener(addr, &credential) {
            Err(Error::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected bind failure, got {:?}", other.map(|_| ())),
        }
    }
}
