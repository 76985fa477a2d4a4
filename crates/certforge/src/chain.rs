//! Certificate chain validation.
//!
//! Builds the chain leaf-first by following issuer DNs through the supplied
//! intermediates and trust roots, then checks each link. Findings
//! accumulate in the report; the only hard failure is input that does not
//! parse as a certificate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::types::{Certificate, SerialNumber};

/// Which checks the validator runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChainOptions {
    /// Flag links outside their validity window.
    pub check_expiration: bool,
    /// Verify each link's signature against its issuer.
    pub check_signatures: bool,
    /// Flag revoked links. Needs a status source passed to
    /// [`validate_chain`]; without one the pass is skipped.
    pub check_revocation: bool,
    /// Require the chain to terminate at one of the supplied trust roots.
    pub require_trusted_root: bool,
    /// Require issuing links to carry CA basic constraints and a key usage
    /// permitting certificate signing.
    pub check_ca_constraints: bool,
    /// Longest chain the validator will follow.
    pub max_depth: usize,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            check_expiration: true,
            check_signatures: true,
            check_revocation: true,
            require_trusted_root: false,
            check_ca_constraints: true,
            max_depth: 10,
        }
    }
}

/// Answers whether a serial has a committed revocation.
///
/// Implemented by the registry (ledger lookup) and by
/// [`crate::ocsp::OcspResolver`] (cached responder answer).
pub trait RevocationStatusSource: Send + Sync {
    /// Returns true when a revocation is on record for the serial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the underlying store is unavailable.
    fn is_revoked(&self, serial: &SerialNumber) -> Result<bool>;
}

/// Per-link outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Link checks passed.
    Valid,
    /// Chain ends here without reaching a supplied trust root.
    UntrustedRoot,
    /// No issuer certificate could be found for this link.
    Broken,
}

/// One certificate in the validated chain, leaf first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Subject DN.
    pub subject: String,
    /// Issuer DN.
    pub issuer: String,
    /// Serial number.
    pub serial: SerialNumber,
    /// Link outcome.
    pub status: LinkStatus,
    /// Validity window end.
    pub not_after: DateTime<Utc>,
    /// Days until expiry; negative once expired.
    pub days_until_expiry: i64,
    /// Signature verification result; `None` when the check was skipped.
    pub signature_ok: Option<bool>,
}

/// Full validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Links in leaf-to-root order.
    pub links: Vec<ChainLink>,
    /// Accumulated findings; empty for a valid chain.
    pub issues: Vec<String>,
    /// `issues.is_empty()` at report time.
    pub valid: bool,
}

/// Validates a certificate chain.
///
/// `intermediates` and `trust_roots` are PEM certificates. `revocation`
/// supplies status for the revocation pass; pass `None` for a purely
/// structural validation. Re-running with the same inputs and `now`
/// produces the same report.
///
/// # Errors
///
/// Returns [`Error::CertificateParse`] when an input certificate cannot be
/// parsed, and propagates [`Error::Storage`] from the status source.
pub fn validate_chain(
    cert_pem: &str,
    intermediates: &[String],
    trust_roots: &[String],
    revocation: Option<&dyn RevocationStatusSource>,
    options: &ChainOptions,
    now: DateTime<Utc>,
) -> Result<ChainReport> {
    let leaf = Certificate::from_pem(cert_pem)?;
    let intermediates = parse_all(intermediates)?;
    let roots = parse_all(trust_roots)?;

    debug!(
        "Validating chain: leaf={} intermediates={} roots={}",
        leaf.subject(),
        intermediates.len(),
        roots.len()
    );

    let mut links = Vec::new();
    let mut issues = Vec::new();

    let mut current = leaf;
    let mut reached_trusted_root = false;

    loop {
        if links.len() >= options.max_depth {
            issues.push(format!(
                "chain exceeds maximum depth of {}",
                options.max_depth
            ));
            break;
        }

        let self_signed = current.is_self_signed();
        let issuer = if self_signed {
            None
        } else {
            find_issuer(&current, &intermediates, &roots)
        };

        let mut status = LinkStatus::Valid;

        if options.check_expiration {
            if now < current.not_before() {
                issues.push(format!("certificate not yet valid: {}", current.subject()));
            }
            if now >= current.not_after() {
                issues.push(format!("certificate expired: {}", current.subject()));
            }
        }

        let signature_ok = if options.check_signatures {
            let verified = match &issuer {
                Some(issuer) => verify_link(&current, Some(issuer)),
                None if self_signed => verify_link(&current, None),
                None => false,
            };
            if !verified && (issuer.is_some() || self_signed) {
                issues.push(format!(
                    "signature verification failed: {}",
                    current.subject()
                ));
            }
            Some(verified)
        } else {
            None
        };

        if options.check_revocation {
            if let Some(source) = revocation {
                if source.is_revoked(current.serial())? {
                    issues.push(format!("certificate revoked: {}", current.subject()));
                }
            }
        }

        if options.check_ca_constraints {
            if let Some(issuer) = &issuer {
                if let Some(issue) = issuer_constraint_issue(issuer) {
                    issues.push(issue);
                }
            }
        }

        if in_trust_store(&current, &roots) {
            reached_trusted_root = true;
        }

        let terminal = issuer.is_none();
        if terminal && !self_signed {
            status = LinkStatus::Broken;
            issues.push(format!("issuer not found for: {}", current.subject()));
        }
        if terminal && self_signed && options.require_trusted_root && !reached_trusted_root {
            status = LinkStatus::UntrustedRoot;
        }

        links.push(link_for(&current, status, now, signature_ok));

        match issuer {
            Some(issuer) => current = issuer,
            None => break,
        }
    }

    if options.require_trusted_root && !reached_trusted_root {
        issues.push("chain does not terminate at a trusted root".to_string());
    }

    let valid = issues.is_empty();
    Ok(ChainReport {
        links,
        issues,
        valid,
    })
}

fn parse_all(pems: &[String]) -> Result<Vec<Certificate>> {
    pems.iter().map(|pem| Certificate::from_pem(pem)).collect()
}

/// Finds the issuer for a certificate, preferring intermediates.
fn find_issuer(
    certificate: &Certificate,
    intermediates: &[Certificate],
    roots: &[Certificate],
) -> Option<Certificate> {
    intermediates
        .iter()
        .chain(roots.iter())
        .find(|candidate| candidate.subject() == certificate.issuer())
        .cloned()
}

/// Verifies a certificate signature against its issuer, or against its own
/// key when `issuer` is `None`.
fn verify_link(certificate: &Certificate, issuer: Option<&Certificate>) -> bool {
    let Ok((_, child)) = X509Certificate::from_der(certificate.der()) else {
        return false;
    };
    match issuer {
        Some(issuer) => {
            let Ok((_, parent)) = X509Certificate::from_der(issuer.der()) else {
                return false;
            };
            child.verify_signature(Some(parent.public_key())).is_ok()
        }
        None => child.verify_signature(None).is_ok(),
    }
}

/// Checks an issuing certificate for the cA basic constraint and, when a
/// key usage extension is present, the keyCertSign bit.
fn issuer_constraint_issue(certificate: &Certificate) -> Option<String> {
    let Ok((_, parsed)) = X509Certificate::from_der(certificate.der()) else {
        return Some(format!(
            "issuer certificate does not parse: {}",
            certificate.subject()
        ));
    };

    let is_ca = parsed
        .basic_constraints()
        .ok()
        .flatten()
        .is_some_and(|bc| bc.value.ca);
    if !is_ca {
        return Some(format!(
            "issuer lacks CA basic constraints: {}",
            certificate.subject()
        ));
    }

    // Absent key usage places no restriction; a present one must allow
    // certificate signing.
    let may_sign = match parsed.key_usage() {
        Ok(Some(usage)) => usage.value.key_cert_sign(),
        Ok(None) => true,
        Err(_) => false,
    };
    if !may_sign {
        return Some(format!(
            "issuer key usage does not permit certificate signing: {}",
            certificate.subject()
        ));
    }

    None
}

fn in_trust_store(certificate: &Certificate, roots: &[Certificate]) -> bool {
    roots
        .iter()
        .any(|root| root.fingerprint() == certificate.fingerprint())
}

fn link_for(
    certificate: &Certificate,
    status: LinkStatus,
    now: DateTime<Utc>,
    signature_ok: Option<bool>,
) -> ChainLink {
    ChainLink {
        subject: certificate.subject().to_string(),
        issuer: certificate.issuer().to_string(),
        serial: certificate.serial().clone(),
        status,
        not_after: certificate.not_after(),
        days_until_expiry: (certificate.not_after() - now).num_days(),
        signature_ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAuditSink;
    use crate::keys::key_pair_from_der;
    use crate::revocation::{NoopTrigger, RevocationLedger, RevokeRequest};
    use crate::signing::{self, IssuePolicy};
    use crate::testutil::{active_ca, leaf_request};
    use crate::types::{split_pem_blocks, DistinguishedName, RevocationReason, SubjectAltName};
    use std::sync::Arc;

    /// Issues a leaf and returns (leaf_pem, ca_pem, root_pem).
    fn issued_chain() -> (String, String, String) {
        let fixture = active_ca();
        let record = fixture
            .authority
            .issue(fixture.ca_id, leaf_request("leaf.example.com"))
            .unwrap();
        let chain = fixture
            .registry
            .ca(fixture.ca_id)
            .unwrap()
            .certificate_chain_pem
            .unwrap();
        let blocks = split_pem_blocks(&chain, "CERTIFICATE");
        (
            record.certificate_pem,
            blocks[0].clone(),
            blocks[1].clone(),
        )
    }

    #[test]
    fn complete_chain_validates() {
        let (leaf, ca, root) = issued_chain();
        let report = validate_chain(
            &leaf,
            &[ca],
            &[root],
            None,
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(report.valid, "issues: {:?}", report.issues);
        assert_eq!(report.links.len(), 3);
        assert!(report
            .links
            .iter()
            .all(|link| link.status == LinkStatus::Valid));
        assert!(report
            .links
            .iter()
            .all(|link| link.signature_ok == Some(true)));
        assert!(report.links[0].days_until_expiry > 300);
    }

    #[test]
    fn missing_intermediate_breaks_the_chain() {
        let (leaf, _ca, root) = issued_chain();
        let report = validate_chain(
            &leaf,
            &[],
            &[root],
            None,
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(!report.valid);
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].status, LinkStatus::Broken);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("issuer not found")));
    }

    #[test]
    fn untrusted_root_flagged_when_required() {
        let (leaf, ca, root) = issued_chain();
        let options = ChainOptions {
            require_trusted_root: true,
            ..ChainOptions::default()
        };

        // Root supplied for chain building but not trusted: validate against
        // an empty trust store by passing it as an intermediate instead.
        let report =
            validate_chain(&leaf, &[ca, root], &[], None, &options, Utc::now()).unwrap();

        assert!(!report.valid);
        assert_eq!(report.links.last().unwrap().status, LinkStatus::UntrustedRoot);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("trusted root")));
    }

    #[test]
    fn trusted_root_not_required_by_default() {
        let (leaf, ca, root) = issued_chain();
        let report = validate_chain(
            &leaf,
            &[ca, root],
            &[],
            None,
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(report.valid, "issues: {:?}", report.issues);
    }

    #[test]
    fn expired_link_reported() {
        let (leaf, ca, root) = issued_chain();
        let far_future = Utc::now() + chrono::Duration::days(400);
        let report = validate_chain(
            &leaf,
            &[ca],
            &[root],
            None,
            &ChainOptions::default(),
            far_future,
        )
        .unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("expired")));
        assert!(report.links[0].days_until_expiry < 0);
    }

    #[test]
    fn expiration_check_can_be_disabled() {
        let (leaf, ca, root) = issued_chain();
        let far_future = Utc::now() + chrono::Duration::days(400);
        let options = ChainOptions {
            check_expiration: false,
            check_signatures: false,
            ..ChainOptions::default()
        };
        let report = validate_chain(&leaf, &[ca], &[root], None, &options, far_future).unwrap();

        // The leaf is expired but the intermediate (10y) and root (20y) are
        // not, so nothing is flagged with the check off.
        assert!(report.valid, "issues: {:?}", report.issues);
        assert!(report.links.iter().all(|link| link.signature_ok.is_none()));
    }

    #[test]
    fn wrong_issuer_signature_fails() {
        let (leaf, _ca, _root) = issued_chain();
        // A different CA whose subject matches the leaf's issuer DN.
        let imposter = active_ca();
        let imposter_chain = imposter
            .registry
            .ca(imposter.ca_id)
            .unwrap()
            .certificate_chain_pem
            .unwrap();
        let imposter_blocks = split_pem_blocks(&imposter_chain, "CERTIFICATE");

        let report = validate_chain(
            &leaf,
            &[imposter_blocks[0].clone()],
            &[imposter_blocks[1].clone()],
            None,
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("signature verification failed")));
    }

    #[test]
    fn non_ca_issuer_flagged() {
        let fixture = active_ca();
        let first = fixture
            .authority
            .issue(fixture.ca_id, leaf_request("middle.example.com"))
            .unwrap();

        // Abuse the first leaf as an issuer for a second certificate.
        let middle_cert = Certificate::from_pem(&first.certificate_pem).unwrap();
        let middle_private_key = fixture
            .authority
            .export_private_key(&first.serial)
            .unwrap();
        let middle_key = key_pair_from_der(middle_private_key.der()).unwrap();

        let end_key = crate::keys::generate_key_pair(crate::types::KeyAlgorithm::EcdsaP256).unwrap();
        let csr = signing::generate_csr(
            &DistinguishedName::common_name("end.example.com"),
            &end_key,
            &[SubjectAltName::Dns("end.example.com".into())],
        )
        .unwrap();
        let end_cert = signing::sign_certificate(
            &csr.pem,
            &middle_cert,
            &middle_key,
            &SerialNumber::generate(),
            Utc::now(),
            30,
            false,
            &[],
            &IssuePolicy::default(),
        )
        .unwrap();

        let report = validate_chain(
            &end_cert.pem(),
            &[first.certificate_pem.clone()],
            &[],
            None,
            &ChainOptions {
                check_signatures: false,
                ..ChainOptions::default()
            },
            Utc::now(),
        )
        .unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("lacks CA basic constraints")));
    }

    #[test]
    fn depth_limit_enforced() {
        let (leaf, ca, root) = issued_chain();
        let options = ChainOptions {
            max_depth: 1,
            ..ChainOptions::default()
        };
        let report = validate_chain(&leaf, &[ca], &[root], None, &options, Utc::now()).unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("maximum depth")));
    }

    #[test]
    fn revoked_link_flagged_through_status_source() {
        let fixture = active_ca();
        let record = fixture
            .authority
            .issue(fixture.ca_id, leaf_request("leaf.example.com"))
            .unwrap();
        let chain = fixture
            .registry
            .ca(fixture.ca_id)
            .unwrap()
            .certificate_chain_pem
            .unwrap();
        let blocks = split_pem_blocks(&chain, "CERTIFICATE");

        let ledger = RevocationLedger::new(
            Arc::clone(&fixture.registry),
            Arc::new(NoopAuditSink::new()),
            Arc::new(NoopTrigger),
            Arc::clone(&fixture.clock),
        );
        ledger
            .revoke(RevokeRequest {
                serial: record.serial.clone(),
                reason: RevocationReason::KeyCompromise,
                invalidity_date: None,
                actor: "ops".into(),
            })
            .unwrap();

        let report = validate_chain(
            &record.certificate_pem,
            &[blocks[0].clone()],
            &[blocks[1].clone()],
            Some(fixture.registry.as_ref()),
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("certificate revoked")));
    }

    #[test]
    fn revocation_check_can_be_disabled() {
        let fixture = active_ca();
        let record = fixture
            .authority
            .issue(fixture.ca_id, leaf_request("leaf.example.com"))
            .unwrap();
        let chain = fixture
            .registry
            .ca(fixture.ca_id)
            .unwrap()
            .certificate_chain_pem
            .unwrap();
        let blocks = split_pem_blocks(&chain, "CERTIFICATE");

        let ledger = RevocationLedger::new(
            Arc::clone(&fixture.registry),
            Arc::new(NoopAuditSink::new()),
            Arc::new(NoopTrigger),
            Arc::clone(&fixture.clock),
        );
        ledger
            .revoke(RevokeRequest {
                serial: record.serial.clone(),
                reason: RevocationReason::CessationOfOperation,
                invalidity_date: None,
                actor: "ops".into(),
            })
            .unwrap();

        let options = ChainOptions {
            check_revocation: false,
            ..ChainOptions::default()
        };
        let report = validate_chain(
            &record.certificate_pem,
            &[blocks[0].clone()],
            &[blocks[1].clone()],
            Some(fixture.registry.as_ref()),
            &options,
            Utc::now(),
        )
        .unwrap();

        assert!(report.valid, "issues: {:?}", report.issues);
    }

    #[test]
    fn issuer_without_cert_sign_key_usage_flagged() {
        // A self-signed certificate with cA=true but a key usage that does
        // not include keyCertSign.
        let narrow_key = crate::keys::generate_key_pair(crate::types::KeyAlgorithm::EcdsaP256)
            .unwrap();
        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Narrow Root");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
        let narrow_root = params.self_signed(&narrow_key).unwrap();
        let narrow_cert = Certificate::from_pem(&narrow_root.pem()).unwrap();

        let end_key = crate::keys::generate_key_pair(crate::types::KeyAlgorithm::EcdsaP256).unwrap();
        let csr = signing::generate_csr(
            &DistinguishedName::common_name("end.example.com"),
            &end_key,
            &[SubjectAltName::Dns("end.example.com".into())],
        )
        .unwrap();
        let end_cert = signing::sign_certificate(
            &csr.pem,
            &narrow_cert,
            &narrow_key,
            &SerialNumber::generate(),
            Utc::now(),
            30,
            false,
            &[],
            &IssuePolicy::default(),
        )
        .unwrap();

        let report = validate_chain(
            &end_cert.pem(),
            &[narrow_root.pem()],
            &[],
            None,
            &ChainOptions::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("does not permit certificate signing")));
    }

    #[test]
    fn validation_is_idempotent() {
        let (leaf, ca, root) = issued_chain();
        let now = Utc::now();

        let first = validate_chain(
            &leaf,
            &[ca.clone()],
            &[root.clone()],
            None,
            &ChainOptions::default(),
            now,
        )
        .unwrap();
        let second = validate_chain(
            &leaf,
            &[ca],
            &[root],
            None,
            &ChainOptions::default(),
            now,
        )
        .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn garbage_input_is_hard_error() {
        let result = validate_chain(
            "not a certificate",
            &[],
            &[],
            None,
            &ChainOptions::default(),
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::CertificateParse(_))));
    }
}
