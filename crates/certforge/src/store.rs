//! In-memory system of record for CA configs, certificates, revocations,
//! and CRLs.
//!
//! The [`Registry`] owns four lock-guarded maps and all cross-map
//! consistency rules: serial uniqueness, single revocation per certificate,
//! and the per-CA CRL-number critical section. Callers never reach into the
//! maps directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::ca::CaConfig;
use crate::error::{Error, Result};
use crate::types::{
    CaId, CertificateRecord, CertificateStatus, CrlKind, CrlRecord, RevocationRecord, SerialNumber,
};

/// System of record for the CA engine.
///
/// Thread-safe; cheap to share via `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    cas: RwLock<HashMap<CaId, CaConfig>>,
    certificates: RwLock<HashMap<SerialNumber, CertificateRecord>>,
    revocations: RwLock<HashMap<SerialNumber, RevocationRecord>>,
    crls: RwLock<HashMap<CaId, Vec<CrlRecord>>>,
    /// One lock per CA serializing read-counter, sign, persist, increment.
    crl_locks: Mutex<HashMap<CaId, Arc<Mutex<()>>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // CA configs

    /// Inserts a new CA config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a CA with the same name already
    /// exists, or [`Error::Storage`] on lock poisoning.
    pub fn insert_ca(&self, config: CaConfig) -> Result<()> {
        let mut cas = self
            .cas
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

        if cas.values().any(|existing| existing.name == config.name) {
            return Err(Error::InvalidState(format!(
                "CA named '{}' already exists",
                config.name
            )));
        }

        debug!("Storing CA config: {} ({})", config.name, config.id);
        cas.insert(config.id, config);
        Ok(())
    }

    /// Returns a clone of the CA config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown CA.
    pub fn ca(&self, ca_id: CaId) -> Result<CaConfig> {
        self.cas
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(&ca_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("CA {ca_id}")))
    }

    /// Lists all CA configs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn list_cas(&self) -> Result<Vec<CaConfig>> {
        Ok(self
            .cas
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .values()
            .cloned()
            .collect())
    }

    /// Applies a mutation to a stored CA config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown CA.
    pub fn update_ca<F>(&self, ca_id: CaId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut CaConfig),
    {
        let mut cas = self
            .cas
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        let config = cas
            .get_mut(&ca_id)
            .ok_or_else(|| Error::NotFound(format!("CA {ca_id}")))?;
        mutate(config);
        Ok(())
    }

    // Certificates

    /// Inserts an issued certificate record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSerial`] if the serial is already present.
    pub fn insert_certificate(&self, record: CertificateRecord) -> Result<()> {
        let mut certificates = self
            .certificates
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

        if certificates.contains_key(&record.serial) {
            return Err(Error::DuplicateSerial(record.serial.to_string()));
        }

        debug!(
            "Storing certificate: serial={} subject={}",
            record.serial, record.subject
        );
        certificates.insert(record.serial.clone(), record);
        Ok(())
    }

    /// Returns a clone of the certificate record for a serial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown serial.
    pub fn certificate(&self, serial: &SerialNumber) -> Result<CertificateRecord> {
        self.certificates
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(serial)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("certificate {serial}")))
    }

    /// Lists certificates issued by a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn certificates_for_ca(&self, ca_id: CaId) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .certificates
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .values()
            .filter(|record| record.ca_id == ca_id)
            .cloned()
            .collect())
    }

    // Revocations

    /// Flips a certificate to `Revoked` and inserts its revocation record as
    /// one atomic step.
    ///
    /// Returns the updated certificate record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown serial and
    /// [`Error::AlreadyRevoked`] if a revocation record already exists.
    pub fn mark_revoked(&self, record: RevocationRecord) -> Result<CertificateRecord> {
        // Both maps under write locks so no reader sees a revoked status
        // without its record, or vice versa.
        let mut certificates = self
            .certificates
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        let mut revocations = self
            .revocations
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

        let certificate = certificates
            .get_mut(&record.serial)
            .ok_or_else(|| Error::NotFound(format!("certificate {}", record.serial)))?;

        if revocations.contains_key(&record.serial)
            || certificate.status == CertificateStatus::Revoked
        {
            return Err(Error::AlreadyRevoked(record.serial.to_string()));
        }

        certificate.status = CertificateStatus::Revoked;
        revocations.insert(record.serial.clone(), record);
        Ok(certificate.clone())
    }

    /// Returns the revocation record for a serial, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn revocation(&self, serial: &SerialNumber) -> Result<Option<RevocationRecord>> {
        Ok(self
            .revocations
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(serial)
            .cloned())
    }

    /// Lists revocation records for certificates issued by a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn revocations_for_ca(&self, ca_id: CaId) -> Result<Vec<RevocationRecord>> {
        let certificates = self
            .certificates
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        let revocations = self
            .revocations
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

        Ok(revocations
            .values()
            .filter(|revocation| {
                certificates
                    .get(&revocation.serial)
                    .is_some_and(|record| record.ca_id == ca_id)
            })
            .cloned()
            .collect())
    }

    // CRLs

    /// Appends a CRL record. CRLs are immutable and never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn insert_crl(&self, record: CrlRecord) -> Result<()> {
        debug!(
            "Storing CRL: ca={} number={} entries={}",
            record.ca_id, record.number, record.entry_count
        );
        self.crls
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .entry(record.ca_id)
            .or_default()
            .push(record);
        Ok(())
    }

    /// Returns the most recent CRL of any kind for a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn latest_crl(&self, ca_id: CaId) -> Result<Option<CrlRecord>> {
        Ok(self
            .crls
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(&ca_id)
            .and_then(|records| records.iter().max_by_key(|record| record.number))
            .cloned())
    }

    /// Returns the most recent full CRL for a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn latest_full_crl(&self, ca_id: CaId) -> Result<Option<CrlRecord>> {
        Ok(self
            .crls
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(&ca_id)
            .and_then(|records| {
                records
                    .iter()
                    .filter(|record| record.kind == CrlKind::Full)
                    .max_by_key(|record| record.number)
            })
            .cloned())
    }

    /// Lists all CRL records for a CA, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn crls_for_ca(&self, ca_id: CaId) -> Result<Vec<CrlRecord>> {
        Ok(self
            .crls
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .get(&ca_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Increments and returns a CA's CRL counter.
    ///
    /// Callers must hold the CA's [`Registry::crl_lock`] across the
    /// read-sign-persist-increment sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown CA.
    pub fn increment_crl_number(&self, ca_id: CaId) -> Result<u64> {
        let mut cas = self
            .cas
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        let config = cas
            .get_mut(&ca_id)
            .ok_or_else(|| Error::NotFound(format!("CA {ca_id}")))?;
        config.crl_number += 1;
        Ok(config.crl_number)
    }

    /// Returns the per-CA CRL generation lock, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn crl_lock(&self, ca_id: CaId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .crl_locks
            .lock()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        Ok(Arc::clone(locks.entry(ca_id).or_default()))
    }
}

impl crate::chain::RevocationStatusSource for Registry {
    fn is_revoked(&self, serial: &SerialNumber) -> Result<bool> {
        Ok(self.revocation(serial)?.is_some())
    }
}
