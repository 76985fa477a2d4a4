//! Shared test fixtures: an activated CA with captured audit events.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::audit::{AuditEvent, AuditSink};
use crate::ca::{CaEndpoints, CertificateAuthority, InitializeRequest, IssueRequest};
use crate::clock::{Clock, SystemClock};
use crate::envelope::EnvelopeKey;
use crate::keys::generate_key_pair;
use crate::signing::{self, CertProfile, IssuePolicy};
use crate::store::Registry;
use crate::types::{
    CaId, Certificate, DistinguishedName, KeyAlgorithm, SerialNumber, SubjectAltName,
};

/// Audit sink that captures events for assertions.
#[derive(Debug, Default)]
pub(crate) struct CapturingSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl CapturingSink {
    pub(crate) fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(AuditEvent::event_type).collect())
            .unwrap_or_default()
    }
}

impl AuditSink for CapturingSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// An activated CA plus every collaborator a test might need.
pub(crate) struct TestCa {
    pub registry: Arc<Registry>,
    pub envelope_key: EnvelopeKey,
    pub audit: Arc<CapturingSink>,
    pub clock: Arc<dyn Clock>,
    pub authority: CertificateAuthority,
    pub ca_id: CaId,
}

/// Builds an activated `CN=Root` CA with CRL and OCSP endpoints configured.
pub(crate) fn active_ca() -> TestCa {
    active_ca_with_clock(Arc::new(SystemClock))
}

/// Same as [`active_ca`] but with an injected clock.
pub(crate) fn active_ca_with_clock(clock: Arc<dyn Clock>) -> TestCa {
    let registry = Arc::new(Registry::new());
    let envelope_key = EnvelopeKey::generate();
    let audit = Arc::new(CapturingSink::default());
    let authority = CertificateAuthority::new(
        Arc::clone(&registry),
        Arc::clone(&audit) as Arc<dyn AuditSink>,
        envelope_key.clone(),
        Arc::clone(&clock),
    );

    let (ca_id, csr_pem) = authority
        .initialize(InitializeRequest {
            name: "root".to_string(),
            subject: DistinguishedName::common_name("Root"),
            algorithm: KeyAlgorithm::EcdsaP256,
        })
        .unwrap();
    activate_with_external_root(
        &authority,
        ca_id,
        &csr_pem,
        CaEndpoints {
            crl_url: Some("http://pki.example.com/crl".into()),
            ocsp_url: Some("http://pki.example.com/ocsp".into()),
        },
    );

    TestCa {
        registry,
        envelope_key,
        audit,
        clock,
        authority,
        ca_id,
    }
}

/// Signs a CA's CSR with a throwaway external root and activates the CA.
pub(crate) fn activate_with_external_root(
    authority: &CertificateAuthority,
    ca_id: CaId,
    csr_pem: &str,
    endpoints: CaEndpoints,
) {
    let root_key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name =
        signing::to_rcgen_dn(&DistinguishedName::common_name("External Root"));
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let now = Utc::now();
    params.not_before = signing::to_rcgen_time(now - chrono::Duration::hours(1)).unwrap();
    params.not_after = signing::to_rcgen_time(now + chrono::Duration::days(7300)).unwrap();
    let root = params.self_signed(&root_key).unwrap();
    let root_cert = Certificate::from_der(root.der()).unwrap();

    let ca_cert = signing::sign_certificate(
        csr_pem,
        &root_cert,
        &root_key,
        &SerialNumber::generate(),
        now,
        3650,
        true,
        &[],
        &IssuePolicy {
            profile: CertProfile::Ca,
            ..IssuePolicy::default()
        },
    )
    .unwrap();

    let chain = format!("{}{}", ca_cert.pem(), root_cert.pem());
    authority.activate(ca_id, &chain, endpoints).unwrap();
}

/// A server-side-keyed issuance request for the given CN.
pub(crate) fn leaf_request(cn: &str) -> IssueRequest {
    IssueRequest {
        subject: DistinguishedName::common_name(cn),
        sans: vec![SubjectAltName::Dns(cn.to_string())],
        validity_days: 365,
        algorithm: KeyAlgorithm::EcdsaP256,
        csr_pem: None,
        policy: IssuePolicy::default(),
    }
}
