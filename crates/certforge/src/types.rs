//! Core types for the CA engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::SealedKey;
use crate::error::{Error, Result};

/// Unique identifier for a CA instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaId(Uuid);

impl CaId {
    /// Creates a new random CA ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a CA ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A certificate serial number: a positive integer, canonically encoded as
/// lowercase hex with no leading zero bytes.
///
/// Generated serials are 128 bits of cryptographic randomness, sized so that
/// collision is a programming-contract violation rather than a handled case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Generates a new random 128-bit serial number.
    ///
    /// All 16 bytes are random; the DER layer adds its own sign padding when
    /// the top bit is set, so no entropy is sacrificed for encoding.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(&bytes)
    }

    /// Creates a serial number from big-endian integer bytes.
    ///
    /// Leading zero bytes (including DER sign padding) are stripped.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[start..];
        if significant.is_empty() {
            return Self("00".to_string());
        }
        Self(to_hex(significant))
    }

    /// Parses a serial number from a hex string.
    pub fn parse(hex: &str) -> Result<Self> {
        let bytes = from_hex(hex)
            .ok_or_else(|| Error::Validation(format!("invalid serial number hex: {hex}")))?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Returns the big-endian integer bytes.
    #[must_use]
    pub fn as_bytes(&self) -> Vec<u8> {
        from_hex(&self.0).unwrap_or_default()
    }

    /// Returns the canonical hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SerialNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Computes the SHA-256 fingerprint of DER-encoded bytes as lowercase hex.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    to_hex(&digest)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Key algorithm for CA and end-entity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA with the given modulus length in bits.
    Rsa {
        /// Modulus length: 2048, 3072, or 4096.
        bits: usize,
    },
    /// ECDSA over the NIST P-256 curve.
    EcdsaP256,
    /// ECDSA over the NIST P-384 curve.
    EcdsaP384,
}

impl KeyAlgorithm {
    /// Parses an algorithm name plus size/curve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlgorithm`] for unknown combinations.
    pub fn from_parts(algorithm: &str, size_or_curve: &str) -> Result<Self> {
        match algorithm.to_ascii_uppercase().as_str() {
            "RSA" => match size_or_curve {
                "2048" => Ok(Self::Rsa { bits: 2048 }),
                "3072" => Ok(Self::Rsa { bits: 3072 }),
                "4096" => Ok(Self::Rsa { bits: 4096 }),
                other => Err(Error::UnsupportedAlgorithm(format!(
                    "RSA key size: {other}"
                ))),
            },
            "ECDSA" | "EC" => match size_or_curve.to_ascii_uppercase().as_str() {
                "P-256" | "P256" | "PRIME256V1" => Ok(Self::EcdsaP256),
                "P-384" | "P384" | "SECP384R1" => Ok(Self::EcdsaP384),
                other => Err(Error::UnsupportedAlgorithm(format!("ECDSA curve: {other}"))),
            },
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { bits } => write!(f, "RSA-{bits}"),
            Self::EcdsaP256 => write!(f, "ECDSA-P256"),
            Self::EcdsaP384 => write!(f, "ECDSA-P384"),
        }
    }
}

/// Subject Alternative Name types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(std::net::IpAddr),
    /// Email address.
    Email(String),
    /// URI.
    Uri(String),
}

/// A subject or issuer distinguished name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    /// Common name (CN).
    pub common_name: String,
    /// Organization (O).
    pub organization: Option<String>,
    /// Organizational unit (OU).
    pub organizational_unit: Option<String>,
    /// Country (C).
    pub country: Option<String>,
    /// State or province (ST).
    pub state: Option<String>,
    /// Locality (L).
    pub locality: Option<String>,
}

impl DistinguishedName {
    /// Creates a DN with only a common name.
    #[must_use]
    pub fn common_name(cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            ..Self::default()
        }
    }

    /// Parses a DN from a string like `CN=Root, O=Example, C=US`.
    ///
    /// # Errors
    ///
    /// Returns an error if no CN attribute is present or an attribute is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let mut dn = Self::default();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::Validation(format!("malformed DN attribute: {part}"))
            })?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_uppercase().as_str() {
                "CN" => dn.common_name = value,
                "O" => dn.organization = Some(value),
                "OU" => dn.organizational_unit = Some(value),
                "C" => dn.country = Some(value),
                "ST" => dn.state = Some(value),
                "L" => dn.locality = Some(value),
                other => {
                    return Err(Error::Validation(format!("unknown DN attribute: {other}")));
                }
            }
        }
        if dn.common_name.is_empty() {
            return Err(Error::Validation("DN is missing a CN attribute".into()));
        }
        Ok(dn)
    }
}

impl std::fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CN={}", self.common_name)?;
        if let Some(o) = &self.organization {
            write!(f, ", O={o}")?;
        }
        if let Some(ou) = &self.organizational_unit {
            write!(f, ", OU={ou}")?;
        }
        if let Some(l) = &self.locality {
            write!(f, ", L={l}")?;
        }
        if let Some(st) = &self.state {
            write!(f, ", ST={st}")?;
        }
        if let Some(c) = &self.country {
            write!(f, ", C={c}")?;
        }
        Ok(())
    }
}

/// CA lifecycle status. The transition is one-way: `Initializing` to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaStatus {
    /// Key pair generated, CSR issued, certificate not yet uploaded.
    Initializing,
    /// Certificate uploaded; the CA can sign.
    Active,
    /// Administratively suspended.
    Suspended,
}

/// Stored certificate status. Expiry is derived from the validity window,
/// never stored as a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateStatus {
    /// Issued and not revoked.
    Active,
    /// A revocation record exists.
    Revoked,
    /// Derived: `valid_to` is in the past.
    Expired,
}

/// RFC 5280 revocation reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevocationReason {
    /// No reason given.
    Unspecified,
    /// Subject key compromised.
    KeyCompromise,
    /// Issuing CA key compromised.
    CaCompromise,
    /// Subject's affiliation changed.
    AffiliationChanged,
    /// Certificate superseded by a replacement.
    Superseded,
    /// Subject ceased operation.
    CessationOfOperation,
    /// Certificate placed on hold.
    CertificateHold,
    /// Remove from CRL (hold released).
    RemoveFromCrl,
    /// Privilege withdrawn.
    PrivilegeWithdrawn,
    /// Attribute authority compromised.
    AaCompromise,
}

impl RevocationReason {
    /// Converts to the rcgen reason code for CRL encoding.
    #[must_use]
    pub const fn to_rcgen(self) -> rcgen::RevocationReason {
        match self {
            Self::Unspecified => rcgen::RevocationReason::Unspecified,
            Self::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
            Self::CaCompromise => rcgen::RevocationReason::CaCompromise,
            Self::AffiliationChanged => rcgen::RevocationReason::AffiliationChanged,
            Self::Superseded => rcgen::RevocationReason::Superseded,
            Self::CessationOfOperation => rcgen::RevocationReason::CessationOfOperation,
            Self::CertificateHold => rcgen::RevocationReason::CertificateHold,
            Self::RemoveFromCrl => rcgen::RevocationReason::RemoveFromCrl,
            Self::PrivilegeWithdrawn => rcgen::RevocationReason::PrivilegeWithdrawn,
            Self::AaCompromise => rcgen::RevocationReason::AaCompromise,
        }
    }
}

/// A DER-encoded X.509 certificate with parsed metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// DER-encoded certificate bytes.
    der: Vec<u8>,
    /// Certificate validity start time.
    not_before: DateTime<Utc>,
    /// Certificate validity end time.
    not_after: DateTime<Utc>,
    /// Subject DN string.
    subject: String,
    /// Issuer DN string.
    issuer: String,
    /// Serial number.
    serial: SerialNumber,
    /// Subject alternative names.
    san: Vec<SubjectAltName>,
}

impl Certificate {
    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertificateParse`] if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::CertificateParse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::CertificateParse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::CertificateParse("invalid not_after timestamp".into()))?;

        let subject = cert.subject().to_string();
        let issuer = cert.issuer().to_string();
        let serial = SerialNumber::from_bytes(cert.raw_serial());
        let san = extract_san(&cert);

        Ok(Self {
            der: der.to_vec(),
            not_before,
            not_after,
            subject,
            issuer,
            serial,
            san,
        })
    }

    /// Parses a certificate from PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertificateParse`] if decoding or parsing fails.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_to_der(pem, "CERTIFICATE")?;
        Self::from_der(&der)
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        der_to_pem(&self.der, "CERTIFICATE")
    }

    /// Returns the SHA-256 fingerprint of the DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.der)
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject DN string.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer DN string.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the serial number.
    #[must_use]
    pub const fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns true if the certificate is self-signed (subject equals issuer).
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Extracts SANs from a parsed certificate.
fn extract_san(cert: &x509_parser::certificate::X509Certificate) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => {
                    sans.push(SubjectAltName::Dns((*dns).to_string()));
                }
                x509_parser::extensions::GeneralName::IPAddress(ip_bytes) => {
                    if let Some(ip) = parse_ip_bytes(ip_bytes) {
                        sans.push(SubjectAltName::Ip(ip));
                    }
                }
                x509_parser::extensions::GeneralName::RFC822Name(email) => {
                    sans.push(SubjectAltName::Email((*email).to_string()));
                }
                x509_parser::extensions::GeneralName::URI(uri) => {
                    sans.push(SubjectAltName::Uri((*uri).to_string()));
                }
                _ => {}
            }
        }
    }

    sans
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Encodes DER bytes as a PEM block with the given label.
#[must_use]
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Decodes the first PEM block with the given label into DER bytes.
///
/// # Errors
///
/// Returns [`Error::CertificateParse`] if no such block exists or the
/// base64 body is malformed.
pub fn pem_to_der(pem: &str, label: &str) -> Result<Vec<u8>> {
    use base64::Engine;

    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem
        .find(&begin)
        .ok_or_else(|| Error::CertificateParse(format!("missing PEM block: {label}")))?;
    let body_start = start + begin.len();
    let body_end = pem[body_start..]
        .find(&end)
        .map(|i| body_start + i)
        .ok_or_else(|| Error::CertificateParse(format!("unterminated PEM block: {label}")))?;

    let body: String = pem[body_start..body_end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| Error::CertificateParse(format!("invalid PEM base64: {e}")))
}

/// Splits concatenated PEM text into individual blocks with the given label.
#[must_use]
pub fn split_pem_blocks(pem: &str, label: &str) -> Vec<String> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(&begin) {
        let Some(stop) = rest[start..].find(&end) else {
            break;
        };
        let stop = start + stop + end.len();
        blocks.push(rest[start..stop].to_string());
        rest = &rest[stop..];
    }
    blocks
}

/// A private key with secure memory handling.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    /// DER-encoded (PKCS#8) private key bytes.
    der: Vec<u8>,
}

impl PrivateKey {
    /// Creates a new private key from DER-encoded bytes.
    #[must_use]
    pub const fn new(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Returns the DER-encoded private key bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded private key.
    #[must_use]
    pub fn pem(&self) -> String {
        der_to_pem(&self.der, "PRIVATE KEY")
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("der", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone(),
        }
    }
}

/// One row per issued leaf or intermediate certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Serial number, unique within the owning CA's serial space.
    pub serial: SerialNumber,
    /// Subject DN string.
    pub subject: String,
    /// Issuer DN string.
    pub issuer: String,
    /// PEM-encoded certificate.
    pub certificate_pem: String,
    /// Envelope-encrypted private key, present only for server-side generation.
    pub sealed_key: Option<SealedKey>,
    /// Key algorithm.
    pub algorithm: KeyAlgorithm,
    /// Validity window start.
    pub valid_from: DateTime<Utc>,
    /// Validity window end.
    pub valid_to: DateTime<Utc>,
    /// Subject alternative names.
    pub sans: Vec<SubjectAltName>,
    /// SHA-256 fingerprint of the DER encoding.
    pub fingerprint: String,
    /// Stored status; expiry is derived, not stored.
    pub status: CertificateStatus,
    /// Owning CA.
    pub ca_id: CaId,
}

impl CertificateRecord {
    /// Returns the effective status at `now`: stored status, except that an
    /// unrevoked certificate past `valid_to` reads as `Expired`.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> CertificateStatus {
        match self.status {
            CertificateStatus::Revoked => CertificateStatus::Revoked,
            _ if now >= self.valid_to => CertificateStatus::Expired,
            other => other,
        }
    }
}

/// One-to-one with a revoked certificate. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Serial of the revoked certificate.
    pub serial: SerialNumber,
    /// When the revocation was recorded.
    pub revoked_at: DateTime<Utc>,
    /// Reason code.
    pub reason: RevocationReason,
    /// Optional date the certificate is believed compromised from.
    pub invalidity_date: Option<DateTime<Utc>>,
    /// Operator who revoked.
    pub actor: String,
}

/// Full vs. delta CRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrlKind {
    /// Complete list of unexpired revocations.
    Full,
    /// Revocations since the referenced full CRL.
    Delta {
        /// CRL number of the baseline full CRL.
        base_number: u64,
    },
}

/// One row per CRL generation event. Immutable; superseded, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlRecord {
    /// Owning CA.
    pub ca_id: CaId,
    /// Strictly increasing per CA, no gaps.
    pub number: u64,
    /// DER-encoded signed CRL.
    pub der: Vec<u8>,
    /// Issuance time.
    pub this_update: DateTime<Utc>,
    /// Deadline by which the next CRL is published.
    pub next_update: DateTime<Utc>,
    /// Full or delta.
    pub kind: CrlKind,
    /// Number of revocation entries encoded.
    pub entry_count: usize,
}
