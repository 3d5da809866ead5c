//! Self-signed channel credential for the listening role
//!
//! The listener needs a certificate and private key to complete the TLS 1.3
//! handshake that QUIC requires. Both are generated in memory at startup and
//! never written anywhere.

use crate::config::KeyAlgorithm;
use crate::Result;
use log::debug;
use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber, SignatureAlgorithm};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Common name and SAN placed in the generated certificate.
pub const CREDENTIAL_NAME: &str = "quic-duplex";

/// A self-signed certificate and the private key it binds.
///
/// The subject and issuer are the same generated key. There is no issuing
/// authority and no revocation.
#[derive(Debug)]
pub struct Credential {
    certificate: CertificateDer<'static>,
    private_key: PrivateKeyDer<'static>,
    algorithm: KeyAlgorithm,
}

impl Credential {
    /// Returns the DER-encoded certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Returns the certificate chain to present during the handshake.
    pub fn cert_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.certificate.clone()]
    }

    /// Returns a copy of the private key for handing to the TLS stack.
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        self.private_key.clone_key()
    }

    /// Returns the algorithm the key pair was generated with.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }
}

fn signature_algorithm(algorithm: KeyAlgorithm) -> &'static SignatureAlgorithm {
    match algorithm {
        KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
    }
}

/// Generates a fresh key pair and a certificate self-signed with it.
///
/// # Errors
///
/// Returns [`crate::Error::Credential`] if key generation or certificate
/// encoding fails. The listener cannot serve without a credential, so callers
/// treat this as fatal.
///
/// # Examples
///
/// ```
/// use quic_duplex::{credential::generate_credential, KeyAlgorithm};
///
/// let credential = generate_credential(KeyAlgorithm::EcdsaP256).unwrap();
/// assert!(!credential.certificate().is_empty());
/// ```
pub fn generate_credential(algorithm: KeyAlgorithm) -> Result<Credential> {
    let key_pair = KeyPair::generate_for(signature_algorithm(algorithm))?;

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        CREDENTIAL_NAME.to_string(),
    ])?;
    params
        .distinguished_name
        .push(DnType::CommonName, CREDENTIAL_NAME);
    params.serial_number = Some(SerialNumber::from_slice(&[1]));

    let certificate = params.self_signed(&key_pair)?;
    debug!(
        "Generated {:?} credential ({} byte certificate)",
        algorithm,
        certificate.der().len()
    );

    Ok(Credential {
        certificate: certificate.der().clone(),
        private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        algorithm,
    })
}
