//! Revocation ledger.
//!
//! Revocation is a two-step contract: the status flip and the ledger insert
//! commit atomically in the registry, then a regeneration trigger fires so
//! the CA's CRL catches up. The trigger is fire-and-forget; its failure
//! never unwinds a committed revocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::Registry;
use crate::types::{CaId, CertificateRecord, RevocationReason, RevocationRecord, SerialNumber};

/// Observer notified synchronously once a revocation has committed, before
/// `revoke` returns. Used to drop cached OCSP answers for the serial.
pub trait RevocationObserver: Send + Sync {
    /// Called with the serial of the newly revoked certificate.
    fn revoked(&self, serial: &SerialNumber);
}

/// Hook invoked after a successful revocation so the owning CA's CRL can be
/// regenerated out of band.
pub trait RegenTrigger: Send + Sync {
    /// Requests CRL regeneration for a CA. Must not block and must not fail
    /// the caller.
    fn fire(&self, ca_id: CaId);
}

/// Trigger that does nothing. Used in tests and in deployments that rely on
/// the scheduler alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

impl RegenTrigger for NoopTrigger {
    fn fire(&self, _ca_id: CaId) {}
}

/// Trigger that spawns the regeneration on the ambient tokio runtime.
pub struct SpawnTrigger {
    regenerate: Arc<dyn Fn(CaId) + Send + Sync>,
}

impl SpawnTrigger {
    /// Creates a trigger that runs `regenerate` on a spawned task.
    pub fn new<F>(regenerate: F) -> Self
    where
        F: Fn(CaId) + Send + Sync + 'static,
    {
        Self {
            regenerate: Arc::new(regenerate),
        }
    }
}

impl std::fmt::Debug for SpawnTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnTrigger").finish_non_exhaustive()
    }
}

impl RegenTrigger for SpawnTrigger {
    fn fire(&self, ca_id: CaId) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let regenerate = Arc::clone(&self.regenerate);
                handle.spawn(async move {
                    regenerate(ca_id);
                });
            }
            Err(_) => {
                warn!("No tokio runtime; skipping CRL regeneration for CA {ca_id}");
            }
        }
    }
}

/// Parameters recorded alongside a revocation.
#[derive(Debug, Clone)]
pub struct RevokeRequest {
    /// Serial of the certificate to revoke.
    pub serial: SerialNumber,
    /// RFC 5280 reason code.
    pub reason: RevocationReason,
    /// Optional date from which the certificate is considered compromised.
    pub invalidity_date: Option<DateTime<Utc>>,
    /// Operator performing the revocation.
    pub actor: String,
}

/// The revocation service.
pub struct RevocationLedger {
    registry: Arc<Registry>,
    audit: Arc<dyn AuditSink>,
    trigger: Arc<dyn RegenTrigger>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn RevocationObserver>>,
}

impl RevocationLedger {
    /// Creates a ledger over the given registry.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        audit: Arc<dyn AuditSink>,
        trigger: Arc<dyn RegenTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            audit,
            trigger,
            clock,
            observers: Vec::new(),
        }
    }

    /// Registers an observer notified before `revoke` returns.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RevocationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Revokes a certificate.
    ///
    /// Returns the updated certificate record. The regeneration trigger
    /// fires only after the revocation has committed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown serial and
    /// [`Error::AlreadyRevoked`] for a second revocation of the same
    /// certificate.
    ///
    /// [`Error::NotFound`]: crate::Error::NotFound
    /// [`Error::AlreadyRevoked`]: crate::Error::AlreadyRevoked
    pub fn revoke(&self, request: RevokeRequest) -> Result<CertificateRecord> {
        let record = RevocationRecord {
            serial: request.serial.clone(),
            revoked_at: self.clock.now(),
            reason: request.reason,
            invalidity_date: request.invalidity_date,
            actor: request.actor.clone(),
        };

        let certificate = self.registry.mark_revoked(record)?;

        for observer in &self.observers {
            observer.revoked(&request.serial);
        }

        info!(
            "Revoked certificate: serial={} reason={:?} actor={}",
            request.serial, request.reason, request.actor
        );
        self.audit
            .record(&AuditEvent::new(AuditEventKind::CertificateRevoked {
                ca_id: certificate.ca_id,
                serial: request.serial.to_string(),
                reason: format!("{:?}", request.reason),
                actor: request.actor,
            }));

        self.trigger.fire(certificate.ca_id);

        Ok(certificate)
    }

    /// Returns the revocation record for a serial, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    ///
    /// [`Error::Storage`]: crate::Error::Storage
    pub fn status(&self, serial: &SerialNumber) -> Result<Option<RevocationRecord>> {
        self.registry.revocation(serial)
    }
}
