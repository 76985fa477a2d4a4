//! Audit events and sinks.
//!
//! The engine emits structured events to a pluggable [`AuditSink`] on every
//! lifecycle transition. Emission is fire-and-forget: a sink must never fail
//! the operation that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CaId;

/// A structured audit event carrying enough metadata to reconstruct
/// "who did what to which certificate when".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: AuditEventKind,
}

/// The set of events the engine emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// A CA key pair was generated and its CSR produced.
    CaCsrGenerated {
        /// CA this event belongs to.
        ca_id: CaId,
        /// CA subject DN.
        subject: String,
    },
    /// A CA certificate was uploaded and the CA activated.
    CaCertificateUploaded {
        /// CA this event belongs to.
        ca_id: CaId,
        /// CA subject DN.
        subject: String,
    },
    /// An end-entity or intermediate certificate was issued.
    CertificateIssued {
        /// Issuing CA.
        ca_id: CaId,
        /// Certificate subject DN.
        subject: String,
        /// Certificate serial.
        serial: String,
    },
    /// A certificate was revoked.
    CertificateRevoked {
        /// Owning CA.
        ca_id: CaId,
        /// Certificate serial.
        serial: String,
        /// Reason code name.
        reason: String,
        /// Operator who revoked.
        actor: String,
    },
    /// A certificate was renewed (re-issued under a new serial).
    CertificateRenewed {
        /// Issuing CA.
        ca_id: CaId,
        /// Certificate subject DN.
        subject: String,
        /// Old serial.
        old_serial: String,
        /// New serial.
        new_serial: String,
    },
    /// A CRL was generated and persisted.
    CrlGenerated {
        /// Owning CA.
        ca_id: CaId,
        /// CRL number.
        crl_number: u64,
        /// Number of revocation entries.
        entry_count: usize,
        /// Whether this was a delta CRL.
        delta: bool,
    },
}

impl AuditEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Returns a short type name for the event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match &self.kind {
            AuditEventKind::CaCsrGenerated { .. } => "CA_CSR_GENERATED",
            AuditEventKind::CaCertificateUploaded { .. } => "CA_CERTIFICATE_UPLOADED",
            AuditEventKind::CertificateIssued { .. } => "CERTIFICATE_ISSUED",
            AuditEventKind::CertificateRevoked { .. } => "CERTIFICATE_REVOKED",
            AuditEventKind::CertificateRenewed { .. } => "CERTIFICATE_RENEWED",
            AuditEventKind::CrlGenerated { .. } => "CRL_GENERATED",
        }
    }

    /// Serializes the event as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Trait for audit backends.
///
/// Implementations must be infallible from the caller's perspective:
/// persist, forward, or drop, but never propagate an error.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that writes structured events through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Creates a new tracing-based audit sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let event_type = event.event_type();
        let json = event.to_json().unwrap_or_else(|_| "{}".to_string());
        tracing::info!(
            target: "certforge_audit",
            event_id = %event.event_id,
            %event_type,
            timestamp = %event.timestamp,
            event_json = %json,
            "[AUDIT] {event_type}"
        );
    }
}

/// A no-op sink for tests or disabled auditing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl NoopAuditSink {
    /// Creates a new no-op audit sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {
        // Intentionally does nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A test sink that captures events.
    #[derive(Debug, Default)]
    pub(crate) struct CapturingSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for CapturingSink {
        fn record(&self, event: &AuditEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }

    #[test]
    fn event_types_are_stable() {
        let ca_id = CaId::new();
        let event = AuditEvent::new(AuditEventKind::CaCsrGenerated {
            ca_id,
            subject: "CN=Root".into(),
        });
        assert_eq!(event.event_type(), "CA_CSR_GENERATED");

        let event = AuditEvent::new(AuditEventKind::CrlGenerated {
            ca_id,
            crl_number: 3,
            entry_count: 1,
            delta: false,
        });
        assert_eq!(event.event_type(), "CRL_GENERATED");
    }

    #[test]
    fn event_serializes_to_json() {
        let event = AuditEvent::new(AuditEventKind::CertificateIssued {
            ca_id: CaId::new(),
            subject: "CN=leaf.example.com".into(),
            serial: "abcd".into(),
        });
        let json = event.to_json().unwrap();
        assert!(json.contains("CertificateIssued"));
        assert!(json.contains("leaf.example.com"));
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        let sink = TracingAuditSink::new();
        sink.record(&AuditEvent::new(AuditEventKind::CertificateRevoked {
            ca_id: CaId::new(),
            serial: "abcd".into(),
            reason: "KeyCompromise".into(),
            actor: "ops".into(),
        }));
    }

    #[test]
    fn noop_sink_does_nothing() {
        let sink = NoopAuditSink::new();
        sink.record(&AuditEvent::new(AuditEventKind::CaCsrGenerated {
            ca_id: CaId::new(),
            subject: "CN=Root".into(),
        }));
    }

    #[test]
    fn capturing_sink_collects_events() {
        let sink = CapturingSink::default();
        sink.record(&AuditEvent::new(AuditEventKind::CaCsrGenerated {
            ca_id: CaId::new(),
            subject: "CN=Root".into(),
        }));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn sink_is_object_safe() {
        let counter = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        impl AuditSink for Counting {
            fn record(&self, _event: &AuditEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sink: Arc<dyn AuditSink> = Arc::new(Counting(Arc::clone(&counter)));
        sink.record(&AuditEvent::new(AuditEventKind::CaCsrGenerated {
            ca_id: CaId::new(),
            subject: "CN=Root".into(),
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
