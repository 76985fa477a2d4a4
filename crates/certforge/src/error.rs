//! CA engine error types.

use thiserror::Error;

/// Result type for CA engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// CA engine error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted against a CA or certificate in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown CA, certificate, CRL, or renewal reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Certificate already has a revocation record.
    #[error("certificate already revoked: {0}")]
    AlreadyRevoked(String),

    /// Serial number already exists in this CA's serial space.
    #[error("duplicate serial number: {0}")]
    DuplicateSerial(String),

    /// Unknown key algorithm, size, or curve.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// CSR could not be parsed.
    #[error("CSR parsing failed: {0}")]
    CsrParse(String),

    /// Stored key material cannot be converted to the signing backend's representation.
    #[error("key format error: {0}")]
    KeyFormat(String),

    /// Certificate could not be parsed.
    #[error("certificate parsing failed: {0}")]
    CertificateParse(String),

    /// Signing attempted without an activated CA.
    #[error("CA is not active: {0}")]
    CaInactive(String),

    /// Delta CRL requested but no full CRL exists as a baseline.
    #[error("no baseline CRL: {0}")]
    NoBaselineCrl(String),

    /// Delta CRL requested but nothing was revoked since the baseline.
    #[error("nothing to delta-encode: {0}")]
    NothingToDeltaEncode(String),

    /// Key envelope encryption or decryption failed. Always fatal.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// CRL publication to an endpoint failed. Non-fatal, recorded per endpoint.
    #[error("distribution failure: {0}")]
    Distribution(String),

    /// Certificate, CSR, or CRL generation failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Subject Alternative Name error.
    #[error("SAN error: {0}")]
    San(String),
}
