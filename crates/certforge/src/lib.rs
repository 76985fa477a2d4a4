//! Private Certificate Authority engine.
#![forbid(unsafe_code)]
//!
//! This crate manages the full lifecycle of an internal CA: key generation
//! and CSR production, activation with an externally signed certificate
//! chain, policy-driven certificate issuance, revocation, CRL generation
//! (full and delta), OCSP status resolution, and chain validation. Private
//! keys are envelope-encrypted before they touch storage.
//!
//! # Overview
//!
//! The engine is a set of service objects sharing one [`Registry`]:
//! - [`CertificateAuthority`] — initialize, activate, issue, renew
//! - [`RevocationLedger`] — revoke with an immutable ledger entry
//! - [`CrlGenerator`] — signed full/delta CRLs with gap-free numbering
//! - [`OcspResolver`] — cached certificate status answers
//! - [`CrlScheduler`] — periodic CRL regeneration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use certforge::{
//!     CaEndpoints, CertificateAuthority, DistinguishedName, EnvelopeKey,
//!     InitializeRequest, IssuePolicy, IssueRequest, KeyAlgorithm, Registry,
//!     SystemClock, TracingAuditSink,
//! };
//!
//! let registry = Arc::new(Registry::new());
//! let authority = CertificateAuthority::new(
//!     Arc::clone(&registry),
//!     Arc::new(TracingAuditSink::new()),
//!     EnvelopeKey::generate(),
//!     Arc::new(SystemClock),
//! );
//!
//! let (ca_id, _csr_pem) = authority.initialize(InitializeRequest {
//!     name: "root".into(),
//!     subject: DistinguishedName::common_name("Example Root CA"),
//!     algorithm: KeyAlgorithm::EcdsaP256,
//! })?;
//!
//! // Sign the CSR out of band, then activate with the resulting chain.
//! let chain_pem = std::fs::read_to_string("ca-chain.pem")?;
//! authority.activate(ca_id, &chain_pem, CaEndpoints::default())?;
//!
//! let record = authority.issue(ca_id, IssueRequest {
//!     subject: DistinguishedName::common_name("leaf.example.com"),
//!     sans: vec![],
//!     validity_days: 365,
//!     algorithm: KeyAlgorithm::EcdsaP256,
//!     csr_pem: None,
//!     policy: IssuePolicy::default(),
//! })?;
//! println!("issued serial {}", record.serial);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`ca`] - CA lifecycle (initialize, activate, issue, renew)
//! - [`revocation`] - Revocation ledger and regeneration triggers
//! - [`crl`] - CRL generation, validation, distribution
//! - [`ocsp`] - OCSP status resolution with caching
//! - [`chain`] - Certificate chain validation
//! - [`signing`] - CSR and X.509 signing engine
//! - [`envelope`] - Envelope encryption for keys at rest
//! - [`store`] - In-memory system of record
//! - [`scheduler`] - Periodic CRL regeneration
//! - [`audit`] - Structured audit events
//! - [`clock`] - Injectable time source
//! - [`types`] - Core types (`Certificate`, `SerialNumber`, records)
//! - [`error`] - Error types

pub mod audit;
pub mod ca;
pub mod chain;
pub mod clock;
pub mod crl;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod ocsp;
pub mod revocation;
pub mod scheduler;
pub mod signing;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types at crate root
pub use audit::{AuditEvent, AuditEventKind, AuditSink, NoopAuditSink, TracingAuditSink};
pub use ca::{CaConfig, CaEndpoints, CertificateAuthority, InitializeRequest, IssueRequest};
pub use chain::{
    validate_chain, ChainLink, ChainOptions, ChainReport, LinkStatus, RevocationStatusSource,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crl::{
    validate_crl, CrlDistributor, CrlGenerator, CrlPolicy, CrlValidation, LoggingDistributor,
};
pub use envelope::{EnvelopeKey, SealedKey};
pub use error::{Error, Result};
pub use keys::{generate_key_pair, key_pair_from_der};
pub use ocsp::{CacheStats, OcspPolicy, OcspResolver, OcspStatus};
pub use revocation::{
    NoopTrigger, RegenTrigger, RevocationLedger, RevocationObserver, RevokeRequest, SpawnTrigger,
};
pub use scheduler::CrlScheduler;
pub use signing::{generate_csr, sign_certificate, CertProfile, CsrBundle, IssuePolicy};
pub use store::Registry;
pub use types::{
    fingerprint, CaId, CaStatus, Certificate, CertificateRecord, CertificateStatus, CrlKind,
    CrlRecord, DistinguishedName, KeyAlgorithm, PrivateKey, RevocationReason, RevocationRecord,
    SerialNumber, SubjectAltName,
};
