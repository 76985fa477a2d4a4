//! CRL generation, validation, and distribution.
//!
//! CRL numbers are strictly increasing and gap-free per CA. The generator
//! holds the CA's CRL lock across read-counter, sign, persist, and
//! increment, so concurrent generations serialize instead of racing.
//! Distribution is best effort: a failing endpoint is logged and never
//! fails the generation that produced the CRL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rcgen::{CertificateRevocationListParams, KeyIdMethod, KeyPair, RevokedCertParams};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::ca::CaConfig;
use crate::clock::Clock;
use crate::envelope::{self, EnvelopeKey};
use crate::error::{Error, Result};
use crate::keys::key_pair_from_der;
use crate::signing;
use crate::store::Registry;
use crate::types::{
    CaId, CaStatus, Certificate, CrlKind, CrlRecord, RevocationReason, RevocationRecord,
    SerialNumber,
};

/// CRL issuance policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrlPolicy {
    /// Validity window of a full CRL in hours.
    pub full_validity_hours: u32,
    /// Validity window of a delta CRL in hours.
    pub delta_validity_hours: u32,
    /// Keep entries for certificates that have already expired.
    pub include_expired: bool,
}

impl Default for CrlPolicy {
    fn default() -> Self {
        Self {
            full_validity_hours: 24,
            delta_validity_hours: 6,
            include_expired: false,
        }
    }
}

/// Pushes a signed CRL to a publication endpoint.
pub trait CrlDistributor: Send + Sync {
    /// Publishes the DER-encoded CRL to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Distribution`] when the endpoint rejects the CRL.
    fn publish(&self, url: &str, der: &[u8]) -> Result<()>;
}

/// Distributor that only logs. Deployments wire a real transport here.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDistributor;

impl CrlDistributor for LoggingDistributor {
    fn publish(&self, url: &str, der: &[u8]) -> Result<()> {
        info!("Publishing CRL: endpoint={} bytes={}", url, der.len());
        Ok(())
    }
}

/// Outcome of a CRL validation pass.
///
/// Structural problems land in `errors`; conditions a relying party may
/// tolerate land in `warnings`.
#[derive(Debug, Clone, Default)]
pub struct CrlValidation {
    /// Problems that make the CRL unusable.
    pub errors: Vec<String>,
    /// Soft findings, e.g. an expired validity window.
    pub warnings: Vec<String>,
    /// Number of revocation entries.
    pub entry_count: usize,
}

impl CrlValidation {
    /// Returns true when no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The CRL service.
pub struct CrlGenerator {
    registry: Arc<Registry>,
    audit: Arc<dyn AuditSink>,
    envelope_key: EnvelopeKey,
    clock: Arc<dyn Clock>,
    policy: CrlPolicy,
    distributor: Arc<dyn CrlDistributor>,
}

impl CrlGenerator {
    /// Creates a CRL generator over the given registry.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        audit: Arc<dyn AuditSink>,
        envelope_key: EnvelopeKey,
        clock: Arc<dyn Clock>,
        policy: CrlPolicy,
        distributor: Arc<dyn CrlDistributor>,
    ) -> Self {
        Self {
            registry,
            audit,
            envelope_key,
            clock,
            policy,
            distributor,
        }
    }

    /// Generates, persists, and distributes a full CRL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaInactive`] when the CA cannot sign and
    /// [`Error::Generation`] if CRL signing fails.
    pub fn generate_full(&self, ca_id: CaId) -> Result<CrlRecord> {
        let config = self.require_active(ca_id)?;
        let ca_certificate = config.certificate()?;
        let ca_key = self.signing_key(&config)?;

        let lock = self.registry.crl_lock(ca_id)?;
        let record = {
            let _guard = lock
                .lock()
                .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

            let now = self.clock.now();
            let number = self.registry.ca(ca_id)?.crl_number + 1;
            let entries = self.full_entries(ca_id, now)?;
            let next_update = now + Duration::hours(i64::from(self.policy.full_validity_hours));

            let der = sign_crl(&ca_certificate, &ca_key, &entries, number, now, next_update)?;
            let record = CrlRecord {
                ca_id,
                number,
                der,
                this_update: now,
                next_update,
                kind: CrlKind::Full,
                entry_count: entries.len(),
            };
            self.registry.insert_crl(record.clone())?;
            self.registry.increment_crl_number(ca_id)?;
            record
        };

        info!(
            "Generated full CRL: ca={} number={} entries={}",
            ca_id, record.number, record.entry_count
        );
        self.audit.record(&AuditEvent::new(AuditEventKind::CrlGenerated {
            ca_id,
            crl_number: record.number,
            entry_count: record.entry_count,
            delta: false,
        }));
        self.distribute(&config, &record);

        Ok(record)
    }

    /// Generates a delta CRL against the latest full CRL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoBaselineCrl`] when no full CRL exists and
    /// [`Error::NothingToDeltaEncode`] when no revocation happened after
    /// the baseline was issued.
    pub fn generate_delta(&self, ca_id: CaId) -> Result<CrlRecord> {
        let config = self.require_active(ca_id)?;
        let ca_certificate = config.certificate()?;
        let ca_key = self.signing_key(&config)?;

        let lock = self.registry.crl_lock(ca_id)?;
        let record = {
            let _guard = lock
                .lock()
                .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

            let baseline = self
                .registry
                .latest_full_crl(ca_id)?
                .ok_or_else(|| Error::NoBaselineCrl(ca_id.to_string()))?;

            let entries: Vec<RevocationRecord> = self
                .registry
                .revocations_for_ca(ca_id)?
                .into_iter()
                .filter(|revocation| revocation.revoked_at > baseline.this_update)
                .collect();
            if entries.is_empty() {
                return Err(Error::NothingToDeltaEncode(format!(
                    "no revocations after CRL {} for CA {ca_id}",
                    baseline.number
                )));
            }

            let now = self.clock.now();
            let number = self.registry.ca(ca_id)?.crl_number + 1;
            let next_update = now + Duration::hours(i64::from(self.policy.delta_validity_hours));

            let der = sign_crl(&ca_certificate, &ca_key, &entries, number, now, next_update)?;
            let record = CrlRecord {
                ca_id,
                number,
                der,
                this_update: now,
                next_update,
                kind: CrlKind::Delta {
                    base_number: baseline.number,
                },
                entry_count: entries.len(),
            };
            self.registry.insert_crl(record.clone())?;
            self.registry.increment_crl_number(ca_id)?;
            record
        };

        info!(
            "Generated delta CRL: ca={} number={} base={:?} entries={}",
            ca_id, record.number, record.kind, record.entry_count
        );
        self.audit.record(&AuditEvent::new(AuditEventKind::CrlGenerated {
            ca_id,
            crl_number: record.number,
            entry_count: record.entry_count,
            delta: true,
        }));
        self.distribute(&config, &record);

        Ok(record)
    }

    /// Entries for a full CRL: every revocation except hold releases, minus
    /// revocations of already-expired certificates unless the policy keeps
    /// them.
    fn full_entries(&self, ca_id: CaId, now: DateTime<Utc>) -> Result<Vec<RevocationRecord>> {
        let mut entries = Vec::new();
        for revocation in self.registry.revocations_for_ca(ca_id)? {
            if revocation.reason == RevocationReason::RemoveFromCrl {
                continue;
            }
            if !self.policy.include_expired {
                let certificate = self.registry.certificate(&revocation.serial)?;
                if certificate.valid_to <= now {
                    continue;
                }
            }
            entries.push(revocation);
        }
        Ok(entries)
    }

    fn distribute(&self, config: &CaConfig, record: &CrlRecord) {
        for url in config.crl_url.iter() {
            if let Err(e) = self.distributor.publish(url, &record.der) {
                warn!(
                    "CRL distribution failed: ca={} number={} endpoint={} error={}",
                    config.id, record.number, url, e
                );
            }
        }
    }

    fn require_active(&self, ca_id: CaId) -> Result<CaConfig> {
        let config = self.registry.ca(ca_id)?;
        if config.status != CaStatus::Active {
            return Err(Error::CaInactive(ca_id.to_string()));
        }
        Ok(config)
    }

    fn signing_key(&self, config: &CaConfig) -> Result<KeyPair> {
        let sealed = config
            .sealed_key
            .as_ref()
            .ok_or_else(|| Error::KeyFormat(format!("CA {} has no stored key", config.id)))?;
        let der = envelope::open(&self.envelope_key, sealed)?;
        key_pair_from_der(&der)
    }
}

/// Signs a CRL over the given entries.
fn sign_crl(
    ca_certificate: &Certificate,
    ca_key: &KeyPair,
    entries: &[RevocationRecord],
    number: u64,
    this_update: DateTime<Utc>,
    next_update: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let revoked_certs = entries
        .iter()
        .map(|entry| {
            Ok(RevokedCertParams {
                serial_number: rcgen::SerialNumber::from_slice(&entry.serial.as_bytes()),
                revocation_time: signing::to_rcgen_time(entry.revoked_at)?,
                reason_code: Some(entry.reason.to_rcgen()),
                invalidity_date: entry
                    .invalidity_date
                    .map(signing::to_rcgen_time)
                    .transpose()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let params = CertificateRevocationListParams {
        this_update: signing::to_rcgen_time(this_update)?,
        next_update: signing::to_rcgen_time(next_update)?,
        crl_number: rcgen::SerialNumber::from_slice(
            &SerialNumber::from_bytes(&number.to_be_bytes()).as_bytes(),
        ),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::Sha256,
    };

    let issuer = signing::issuer_certificate(ca_certificate, ca_key)?;
    let crl = params
        .signed_by(&issuer, ca_key)
        .map_err(|e| Error::Generation(format!("failed to sign CRL: {e}")))?;

    Ok(crl.der().to_vec())
}

/// Validates a DER-encoded CRL against an optional issuer certificate.
///
/// A bad signature is an error; an elapsed validity window or oddly dated
/// entries are warnings. The same input always produces the same report.
///
/// # Errors
///
/// Returns [`Error::CertificateParse`] only when the DER cannot be parsed
/// as a CRL at all.
pub fn validate_crl(
    der: &[u8],
    issuer: Option<&Certificate>,
    now: DateTime<Utc>,
) -> Result<CrlValidation> {
    use x509_parser::prelude::*;

    let (_, crl) = x509_parser::revocation_list::CertificateRevocationList::from_der(der)
        .map_err(|e| Error::CertificateParse(format!("failed to parse CRL: {e}")))?;

    let mut validation = CrlValidation::default();

    if let Some(issuer) = issuer {
        match X509Certificate::from_der(issuer.der()) {
            Ok((_, issuer_cert)) => {
                if crl.verify_signature(issuer_cert.public_key()).is_err() {
                    validation
                        .errors
                        .push("CRL signature does not verify against the issuer".to_string());
                }
            }
            Err(e) => {
                validation
                    .errors
                    .push(format!("issuer certificate unparseable: {e}"));
            }
        }
    }

    let now_ts = now.timestamp();
    if crl.last_update().timestamp() > now_ts {
        validation
            .warnings
            .push("CRL thisUpdate is in the future".to_string());
    }
    match crl.next_update() {
        Some(next_update) if next_update.timestamp() < now_ts => {
            validation
                .warnings
                .push("CRL validity window has elapsed".to_string());
        }
        Some(_) => {}
        None => {
            validation
                .warnings
                .push("CRL carries no nextUpdate".to_string());
        }
    }

    for revoked in crl.iter_revoked_certificates() {
        validation.entry_count += 1;
        if revoked.revocation_date.timestamp() > now_ts {
            validation.warnings.push(format!(
                "revocation date in the future for serial {}",
                SerialNumber::from_bytes(revoked.raw_serial())
            ));
        }
    }

    Ok(validation)
}
