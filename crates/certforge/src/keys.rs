//! Key pair generation for CA and end-entity certificates.

use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::KeyAlgorithm;

/// Generates a key pair for the requested algorithm.
///
/// ECDSA keys come from the signing backend directly. RSA keys are generated
/// with the `rsa` crate and imported as PKCS#8, since the backend can only
/// sign with existing RSA keys.
///
/// # Errors
///
/// Returns [`Error::UnsupportedAlgorithm`] for RSA sizes other than
/// 2048/3072/4096 and [`Error::Generation`] if generation fails.
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair> {
    debug!("Generating key pair: {}", algorithm);

    match algorithm {
        KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::Generation(format!("failed to generate P-256 key pair: {e}"))),
        KeyAlgorithm::EcdsaP384 => KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
            .map_err(|e| Error::Generation(format!("failed to generate P-384 key pair: {e}"))),
        KeyAlgorithm::Rsa { bits } => generate_rsa_key_pair(bits),
    }
}

/// Reconstructs a signing key pair from stored PKCS#8 DER bytes.
///
/// # Errors
///
/// Returns [`Error::KeyFormat`] when the stored material cannot be converted
/// to the signing backend's representation.
pub fn key_pair_from_der(der: &[u8]) -> Result<KeyPair> {
    KeyPair::try_from(der)
        .map_err(|e| Error::KeyFormat(format!("failed to load stored key material: {e}")))
}

fn generate_rsa_key_pair(bits: usize) -> Result<KeyPair> {
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPrivateKey;

    if !matches!(bits, 2048 | 3072 | 4096) {
        return Err(Error::UnsupportedAlgorithm(format!("RSA key size: {bits}")));
    }

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| Error::Generation(format!("failed to generate RSA-{bits} key: {e}")))?;

    let pkcs8 = private_key
        .to_pkcs8_der()
        .map_err(|e| Error::KeyFormat(format!("failed to encode RSA key as PKCS#8: {e}")))?;

    key_pair_from_der(pkcs8.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_p256_key_pair() {
        let key_pair = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        assert!(!key_pair.serialize_der().is_empty());
    }

    #[test]
    fn generate_p384_key_pair() {
        let key_pair = generate_key_pair(KeyAlgorithm::EcdsaP384).unwrap();
        assert!(!key_pair.serialize_der().is_empty());
    }

    #[test]
    fn generate_rsa_2048_key_pair() {
        let key_pair = generate_key_pair(KeyAlgorithm::Rsa { bits: 2048 }).unwrap();
        assert!(!key_pair.serialize_der().is_empty());
    }

    #[test]
    fn rsa_odd_size_is_unsupported() {
        let result = generate_key_pair(KeyAlgorithm::Rsa { bits: 1024 });
        assert!(matches!(result, Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn key_round_trips_through_der() {
        let key_pair = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let der = key_pair.serialize_der();

        let restored = key_pair_from_der(&der).unwrap();
        assert_eq!(restored.serialize_der(), der);
    }

    #[test]
    fn garbage_der_is_key_format_error() {
        let result = key_pair_from_der(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(result, Err(Error::KeyFormat(_))));
    }
}
