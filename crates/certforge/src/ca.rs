//! CA lifecycle manager.
//!
//! A CA moves through a one-way lifecycle: `initialize` generates the key
//! pair and CSR (`Initializing`), `activate` installs the externally signed
//! certificate chain (`Active`). Only an active CA signs certificates. The
//! private key exists in plaintext only for the duration of a single
//! signing call; at rest it lives inside a [`SealedKey`] envelope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::envelope::{self, EnvelopeKey, SealedKey};
use crate::error::{Error, Result};
use crate::keys::{generate_key_pair, key_pair_from_der};
use crate::signing::{self, IssuePolicy};
use crate::store::Registry;
use crate::types::{
    fingerprint, CaId, CaStatus, Certificate, CertificateRecord, CertificateStatus,
    DistinguishedName, KeyAlgorithm, SerialNumber, SubjectAltName, split_pem_blocks,
};

/// Stored configuration and state for one CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    /// Unique CA identifier.
    pub id: CaId,
    /// Human-readable unique name.
    pub name: String,
    /// Subject DN of the CA certificate.
    pub subject: DistinguishedName,
    /// CA key algorithm.
    pub algorithm: KeyAlgorithm,
    /// Envelope-encrypted CA private key.
    pub sealed_key: Option<SealedKey>,
    /// The CSR produced at initialization.
    pub csr_pem: Option<String>,
    /// PEM chain uploaded at activation, CA certificate first.
    /// Non-empty exactly when the CA is `Active`.
    pub certificate_chain_pem: Option<String>,
    /// Lifecycle status.
    pub status: CaStatus,
    /// Last issued CRL number; 0 before the first CRL.
    pub crl_number: u64,
    /// CRL distribution point URL stamped into issued certificates.
    pub crl_url: Option<String>,
    /// OCSP responder URL stamped into issued certificates.
    pub ocsp_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl CaConfig {
    /// Returns the CA's own certificate (first block of the chain).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaInactive`] when no chain has been uploaded.
    pub fn certificate(&self) -> Result<Certificate> {
        let chain = self
            .certificate_chain_pem
            .as_deref()
            .ok_or_else(|| Error::CaInactive(format!("CA {} has no certificate", self.id)))?;
        let blocks = split_pem_blocks(chain, "CERTIFICATE");
        let first = blocks
            .first()
            .ok_or_else(|| Error::CertificateParse("empty certificate chain".into()))?;
        Certificate::from_pem(first)
    }
}

/// Request to create a new CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Unique CA name.
    pub name: String,
    /// Subject DN for the CA certificate.
    pub subject: DistinguishedName,
    /// Key algorithm.
    pub algorithm: KeyAlgorithm,
}

/// Publication endpoints recorded at activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaEndpoints {
    /// CRL distribution point URL.
    pub crl_url: Option<String>,
    /// OCSP responder URL.
    pub ocsp_url: Option<String>,
}

/// Request to issue a certificate.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// Subject DN. Ignored when `csr_pem` is supplied (the CSR's subject wins).
    pub subject: DistinguishedName,
    /// Subject alternative names. Overrides the CSR's SANs when non-empty.
    pub sans: Vec<SubjectAltName>,
    /// Validity in days from issuance.
    pub validity_days: u32,
    /// Key algorithm for server-side generation.
    pub algorithm: KeyAlgorithm,
    /// Externally produced CSR. When absent, the engine generates the key
    /// pair and seals it alongside the certificate.
    pub csr_pem: Option<String>,
    /// Issuance policy.
    pub policy: IssuePolicy,
}

/// The CA service. All collaborators are injected at construction.
pub struct CertificateAuthority {
    registry: Arc<Registry>,
    audit: Arc<dyn AuditSink>,
    envelope_key: EnvelopeKey,
    clock: Arc<dyn Clock>,
}

impl CertificateAuthority {
    /// Creates a CA service over the given registry.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        audit: Arc<dyn AuditSink>,
        envelope_key: EnvelopeKey,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            audit,
            envelope_key,
            clock,
        }
    }

    /// Generates a CA key pair and CSR, persisting the config as
    /// `Initializing`.
    ///
    /// Returns the new CA id and the CSR to hand to the signing parent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the name is taken and
    /// [`Error::Encryption`] if the key cannot be sealed.
    pub fn initialize(&self, request: InitializeRequest) -> Result<(CaId, String)> {
        info!(
            "Initializing CA '{}' subject={} algorithm={}",
            request.name, request.subject, request.algorithm
        );

        let key_pair = generate_key_pair(request.algorithm)?;
        let sealed_key = envelope::seal(&self.envelope_key, &key_pair.serialize_der())?;
        let csr = signing::generate_csr(&request.subject, &key_pair, &[])?;

        let config = CaConfig {
            id: CaId::new(),
            name: request.name,
            subject: request.subject.clone(),
            algorithm: request.algorithm,
            sealed_key: Some(sealed_key),
            csr_pem: Some(csr.pem.clone()),
            certificate_chain_pem: None,
            status: CaStatus::Initializing,
            crl_number: 0,
            crl_url: None,
            ocsp_url: None,
            created_at: self.clock.now(),
        };
        let ca_id = config.id;
        self.registry.insert_ca(config)?;

        self.audit.record(&AuditEvent::new(AuditEventKind::CaCsrGenerated {
            ca_id,
            subject: request.subject.to_string(),
        }));

        Ok((ca_id, csr.pem))
    }

    /// Installs the signed certificate chain and activates the CA.
    ///
    /// One-way transition; an already-active CA rejects a second upload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the CA is not `Initializing`,
    /// [`Error::KeyFormat`] when the sealed key cannot be reloaded, and
    /// [`Error::Validation`] when the uploaded certificate does not match
    /// the CA's subject or public key.
    pub fn activate(&self, ca_id: CaId, chain_pem: &str, endpoints: CaEndpoints) -> Result<()> {
        let config = self.registry.ca(ca_id)?;
        if config.status != CaStatus::Initializing {
            return Err(Error::InvalidState(format!(
                "CA {ca_id} is not awaiting a certificate"
            )));
        }

        let blocks = split_pem_blocks(chain_pem, "CERTIFICATE");
        let first = blocks
            .first()
            .ok_or_else(|| Error::CertificateParse("chain contains no certificate".into()))?;
        let certificate = Certificate::from_pem(first)?;

        let uploaded_subject = DistinguishedName::parse(certificate.subject())?;
        if uploaded_subject != config.subject {
            return Err(Error::Validation(format!(
                "certificate subject '{}' does not match CA subject '{}'",
                uploaded_subject, config.subject
            )));
        }

        // Confirm the certificate really covers the sealed key.
        let key_pair = self.signing_key(&config)?;
        let spki = key_pair.public_key_der();
        if !public_key_matches(&certificate, &spki) {
            return Err(Error::Validation(
                "certificate public key does not match the CA key".into(),
            ));
        }

        self.registry.update_ca(ca_id, |config| {
            config.certificate_chain_pem = Some(chain_pem.to_string());
            config.status = CaStatus::Active;
            config.crl_url = endpoints.crl_url.clone();
            config.ocsp_url = endpoints.ocsp_url.clone();
        })?;

        info!("CA {} activated: {}", ca_id, config.subject);
        self.audit
            .record(&AuditEvent::new(AuditEventKind::CaCertificateUploaded {
                ca_id,
                subject: config.subject.to_string(),
            }));

        Ok(())
    }

    /// Issues a certificate signed by an active CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaInactive`] when the CA cannot sign,
    /// [`Error::CsrParse`] for a malformed external CSR, and
    /// [`Error::DuplicateSerial`] if the generated serial collides.
    pub fn issue(&self, ca_id: CaId, request: IssueRequest) -> Result<CertificateRecord> {
        let config = self.require_active(ca_id)?;
        let ca_certificate = config.certificate()?;
        let ca_key = self.signing_key(&config)?;

        let serial = SerialNumber::generate();
        let now = self.clock.now();

        // Server-side generation seals the leaf key; an external CSR leaves
        // the key with the requester.
        let (csr_pem, sealed_leaf_key) = match &request.csr_pem {
            Some(pem) => (pem.clone(), None),
            None => {
                let leaf_key = generate_key_pair(request.algorithm)?;
                let sealed = envelope::seal(&self.envelope_key, &leaf_key.serialize_der())?;
                let csr = signing::generate_csr(&request.subject, &leaf_key, &request.sans)?;
                (csr.pem, Some(sealed))
            }
        };

        let mut policy = request.policy.clone();
        if policy.crl_url.is_none() {
            policy.crl_url = config.crl_url.clone();
        }
        if policy.ocsp_url.is_none() {
            policy.ocsp_url = config.ocsp_url.clone();
        }

        let certificate = signing::sign_certificate(
            &csr_pem,
            &ca_certificate,
            &ca_key,
            &serial,
            now,
            request.validity_days,
            false,
            &request.sans,
            &policy,
        )?;

        let record = CertificateRecord {
            serial: serial.clone(),
            subject: certificate.subject().to_string(),
            issuer: certificate.issuer().to_string(),
            certificate_pem: certificate.pem(),
            sealed_key: sealed_leaf_key,
            algorithm: request.algorithm,
            valid_from: certificate.not_before(),
            valid_to: certificate.not_after(),
            sans: certificate.san().to_vec(),
            fingerprint: fingerprint(certificate.der()),
            status: CertificateStatus::Active,
            ca_id,
        };
        self.registry.insert_certificate(record.clone())?;

        info!(
            "Issued certificate: serial={} subject={} ca={}",
            serial, record.subject, ca_id
        );
        self.audit
            .record(&AuditEvent::new(AuditEventKind::CertificateIssued {
                ca_id,
                subject: record.subject.clone(),
                serial: serial.to_string(),
            }));

        Ok(record)
    }

    /// Re-issues a certificate with the same subject, SANs, and validity
    /// length under a fresh serial and key pair.
    ///
    /// The original record is left untouched; callers revoke it separately
    /// if the old key must stop working.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown serial and
    /// [`Error::InvalidState`] when the certificate was revoked.
    pub fn renew(&self, ca_id: CaId, serial: &SerialNumber) -> Result<CertificateRecord> {
        let existing = self.registry.certificate(serial)?;
        if existing.ca_id != ca_id {
            return Err(Error::NotFound(format!(
                "certificate {serial} was not issued by CA {ca_id}"
            )));
        }
        if existing.status == CertificateStatus::Revoked {
            return Err(Error::InvalidState(format!(
                "certificate {serial} is revoked and cannot be renewed"
            )));
        }

        let validity_days =
            u32::try_from((existing.valid_to - existing.valid_from).num_days().max(1))
                .map_err(|_| Error::Validation("certificate validity out of range".into()))?;

        let subject = DistinguishedName::parse(&existing.subject)?;
        let renewed = self.issue(
            ca_id,
            IssueRequest {
                subject,
                sans: existing.sans.clone(),
                validity_days,
                algorithm: existing.algorithm,
                csr_pem: None,
                policy: IssuePolicy::default(),
            },
        )?;

        info!(
            "Renewed certificate: old={} new={} subject={}",
            serial, renewed.serial, renewed.subject
        );
        self.audit
            .record(&AuditEvent::new(AuditEventKind::CertificateRenewed {
                ca_id,
                subject: renewed.subject.clone(),
                old_serial: serial.to_string(),
                new_serial: renewed.serial.to_string(),
            }));

        Ok(renewed)
    }

    /// Decrypts the private key of a server-generated certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the certificate is unknown or its
    /// key was never held server-side.
    pub fn export_private_key(&self, serial: &SerialNumber) -> Result<crate::types::PrivateKey> {
        let record = self.registry.certificate(serial)?;
        let sealed = record
            .sealed_key
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("no stored key for certificate {serial}")))?;
        let der = envelope::open(&self.envelope_key, sealed)?;
        Ok(crate::types::PrivateKey::new(der))
    }

    /// Returns the active config, or `CaInactive`.
    fn require_active(&self, ca_id: CaId) -> Result<CaConfig> {
        let config = self.registry.ca(ca_id)?;
        if config.status != CaStatus::Active {
            return Err(Error::CaInactive(ca_id.to_string()));
        }
        Ok(config)
    }

    /// Opens the sealed CA key into a signing key pair.
    fn signing_key(&self, config: &CaConfig) -> Result<rcgen::KeyPair> {
        let sealed = config
            .sealed_key
            .as_ref()
            .ok_or_else(|| Error::KeyFormat(format!("CA {} has no stored key", config.id)))?;
        let der = envelope::open(&self.envelope_key, sealed)?;
        key_pair_from_der(&der)
    }
}

/// Compares the certificate's SubjectPublicKeyInfo against the given DER.
fn public_key_matches(certificate: &Certificate, spki_der: &[u8]) -> bool {
    use x509_parser::prelude::*;
    X509Certificate::from_der(certificate.der())
        .map(|(_, cert)| cert.public_key().raw == spki_der)
        .unwrap_or(false)
}
