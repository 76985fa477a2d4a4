//! CSR and X.509 signing engine.
//!
//! Turns a CSR (generated in-process or supplied externally) plus CA key
//! material into a fully extension-populated certificate. Every issued
//! certificate carries Basic Constraints (critical), Key Usage (critical),
//! a Subject Key Identifier, an Authority Key Identifier, and, when SANs
//! are present, the Subject Alternative Name extension. CRL distribution
//! point, OCSP responder (AIA), and certificate-policy extensions come
//! from the [`IssuePolicy`].

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CrlDistributionPoint,
    CustomExtension, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, SanType,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use yasna::models::ObjectIdentifier;
use yasna::Tag;

use crate::error::{Error, Result};
use crate::types::{Certificate, DistinguishedName, SerialNumber, SubjectAltName};

/// OID for the Authority Information Access extension (1.3.6.1.5.5.7.1.1).
const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];
/// OID for the AIA OCSP access method (1.3.6.1.5.5.7.48.1).
const OID_AD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];
/// OID for the Certificate Policies extension (2.5.29.32).
const OID_CERTIFICATE_POLICIES: &[u64] = &[2, 5, 29, 32];

/// The kind of certificate being issued, which selects key usages and
/// extended key usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertProfile {
    /// TLS server certificate (serverAuth EKU).
    ServerAuth,
    /// TLS client certificate (clientAuth EKU).
    ClientAuth,
    /// CA certificate (keyCertSign + cRLSign key usages, OCSP signing EKU).
    Ca,
}

/// Closed policy object for certificate issuance. Every recognized field is
/// enumerated here; there is no open-ended option bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePolicy {
    /// Certificate profile.
    pub profile: CertProfile,
    /// CRL distribution point URL embedded in issued certificates.
    pub crl_url: Option<String>,
    /// OCSP responder URL embedded via the AIA extension.
    pub ocsp_url: Option<String>,
    /// Path length constraint; only meaningful for CA certificates.
    pub path_len: Option<u8>,
    /// Certificate policy OIDs in dotted form, e.g. `2.23.140.1.2.1`.
    pub policy_oids: Vec<String>,
}

impl Default for IssuePolicy {
    fn default() -> Self {
        Self {
            profile: CertProfile::ServerAuth,
            crl_url: None,
            ocsp_url: None,
            path_len: None,
            policy_oids: Vec::new(),
        }
    }
}

/// A generated CSR in both encodings.
#[derive(Debug, Clone)]
pub struct CsrBundle {
    /// PEM-encoded CSR.
    pub pem: String,
    /// DER-encoded CSR.
    pub der: Vec<u8>,
}

/// Builds a CSR for the given subject and key pair.
///
/// # Errors
///
/// Returns [`Error::Generation`] if CSR serialization fails and
/// [`Error::San`] for malformed SAN values.
pub fn generate_csr(
    subject: &DistinguishedName,
    key_pair: &KeyPair,
    sans: &[SubjectAltName],
) -> Result<CsrBundle> {
    debug!("Generating CSR for: {}", subject);

    let mut params = CertificateParams::default();
    params.distinguished_name = to_rcgen_dn(subject);
    params.subject_alt_names = convert_sans(sans)?;

    let csr = params
        .serialize_request(key_pair)
        .map_err(|e| Error::Generation(format!("failed to serialize CSR: {e}")))?;

    let pem = csr
        .pem()
        .map_err(|e| Error::Generation(format!("failed to encode CSR as PEM: {e}")))?;

    Ok(CsrBundle {
        pem,
        der: csr.der().to_vec(),
    })
}

/// Signs an end-entity or CA certificate from a CSR.
///
/// The subject DN and any SANs embedded in the CSR are honored unless
/// `sans` is non-empty, in which case it replaces the CSR's SANs.
///
/// # Errors
///
/// Returns [`Error::CsrParse`] for malformed CSR input, [`Error::San`] for
/// malformed SAN values, and [`Error::Generation`] if signing fails.
#[allow(clippy::too_many_arguments)]
pub fn sign_certificate(
    csr_pem: &str,
    ca_certificate: &Certificate,
    ca_key: &KeyPair,
    serial: &SerialNumber,
    valid_from: DateTime<Utc>,
    validity_days: u32,
    is_ca: bool,
    sans: &[SubjectAltName],
    policy: &IssuePolicy,
) -> Result<Certificate> {
    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
        .map_err(|e| Error::CsrParse(format!("failed to parse CSR: {e}")))?;

    debug!(
        "Signing certificate: serial={} issuer={} is_ca={}",
        serial,
        ca_certificate.subject(),
        is_ca
    );

    let params = &mut csr.params;

    params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial.as_bytes()));

    // Allow for clock skew
    let not_before = valid_from - Duration::hours(1);
    let not_after = valid_from + Duration::days(i64::from(validity_days));
    params.not_before = to_rcgen_time(not_before)?;
    params.not_after = to_rcgen_time(not_after)?;

    if is_ca {
        params.is_ca = match policy.path_len {
            Some(depth) => IsCa::Ca(BasicConstraints::Constrained(depth)),
            None => IsCa::Ca(BasicConstraints::Unconstrained),
        };
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
    } else {
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
    }

    params.extended_key_usages = match policy.profile {
        CertProfile::ServerAuth => vec![ExtendedKeyUsagePurpose::ServerAuth],
        CertProfile::ClientAuth => vec![ExtendedKeyUsagePurpose::ClientAuth],
        CertProfile::Ca => vec![ExtendedKeyUsagePurpose::OcspSigning],
    };

    if !sans.is_empty() {
        params.subject_alt_names = convert_sans(sans)?;
    }

    if let Some(crl_url) = &policy.crl_url {
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: vec![crl_url.clone()],
        }];
    }

    let mut custom = Vec::new();
    if let Some(ocsp_url) = &policy.ocsp_url {
        custom.push(build_aia_extension(ocsp_url));
    }
    if !policy.policy_oids.is_empty() {
        custom.push(build_policies_extension(&policy.policy_oids)?);
    }
    params.custom_extensions = custom;

    params.use_authority_key_identifier_extension = true;
    params.key_identifier_method = KeyIdMethod::Sha256;

    let issuer = issuer_certificate(ca_certificate, ca_key)?;
    let signed = csr
        .signed_by(&issuer, ca_key)
        .map_err(|e| Error::Generation(format!("failed to sign certificate: {e}")))?;

    Certificate::from_der(signed.der())
}

/// Parses the validity window from a PEM certificate.
///
/// Callers use this as the single source of truth for stored validity dates
/// rather than re-deriving them.
///
/// # Errors
///
/// Returns [`Error::CertificateParse`] if the input cannot be parsed.
pub fn parse_certificate_dates(pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let cert = Certificate::from_pem(pem)?;
    Ok((cert.not_before(), cert.not_after()))
}

/// Reconstructs an rcgen issuer certificate from the CA's subject and key,
/// so issued certificates embed the correct issuer name and AKI.
pub(crate) fn issuer_certificate(
    ca_certificate: &Certificate,
    ca_key: &KeyPair,
) -> Result<rcgen::Certificate> {
    let subject = DistinguishedName::parse(ca_certificate.subject())?;

    let mut params = CertificateParams::default();
    params.distinguished_name = to_rcgen_dn(&subject);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_rcgen_time(ca_certificate.not_before())?;
    params.not_after = to_rcgen_time(ca_certificate.not_after())?;
    params.key_identifier_method = KeyIdMethod::Sha256;

    params
        .self_signed(ca_key)
        .map_err(|e| Error::Generation(format!("failed to rebuild issuer certificate: {e}")))
}

/// Converts a [`DistinguishedName`] into rcgen's representation.
pub(crate) fn to_rcgen_dn(dn: &DistinguishedName) -> rcgen::DistinguishedName {
    let mut out = rcgen::DistinguishedName::new();
    out.push(DnType::CommonName, &dn.common_name);
    if let Some(o) = &dn.organization {
        out.push(DnType::OrganizationName, o);
    }
    if let Some(ou) = &dn.organizational_unit {
        out.push(DnType::OrganizationalUnitName, ou);
    }
    if let Some(l) = &dn.locality {
        out.push(DnType::LocalityName, l);
    }
    if let Some(st) = &dn.state {
        out.push(DnType::StateOrProvinceName, st);
    }
    if let Some(c) = &dn.country {
        out.push(DnType::CountryName, c);
    }
    out
}

/// Converts `SubjectAltNames` to rcgen `SanTypes`.
pub(crate) fn convert_sans(sans: &[SubjectAltName]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| match san {
            SubjectAltName::Dns(dns) => {
                let ia5 = Ia5String::try_from(dns.clone())
                    .map_err(|e| Error::San(format!("invalid DNS name '{dns}': {e}")))?;
                Ok(SanType::DnsName(ia5))
            }
            SubjectAltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
            SubjectAltName::Email(email) => {
                let ia5 = Ia5String::try_from(email.clone())
                    .map_err(|e| Error::San(format!("invalid email '{email}': {e}")))?;
                Ok(SanType::Rfc822Name(ia5))
            }
            SubjectAltName::Uri(uri) => {
                let ia5 = Ia5String::try_from(uri.clone())
                    .map_err(|e| Error::San(format!("invalid URI '{uri}': {e}")))?;
                Ok(SanType::URI(ia5))
            }
        })
        .collect()
}

/// Converts a chrono `DateTime` to rcgen `OffsetDateTime`.
pub(crate) fn to_rcgen_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Generation(format!("invalid timestamp: {e}")))
}

/// Builds the Authority Information Access extension pointing at the OCSP
/// responder: `SEQUENCE { AccessDescription { id-ad-ocsp, uri } }`.
fn build_aia_extension(ocsp_url: &str) -> CustomExtension {
    let content = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_sequence(|writer| {
                writer
                    .next()
                    .write_oid(&ObjectIdentifier::from_slice(OID_AD_OCSP));
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(6), |writer| {
                        writer.write_ia5_string(ocsp_url);
                    });
            });
        });
    });

    let mut ext = CustomExtension::from_oid_content(OID_AUTHORITY_INFO_ACCESS, content);
    ext.set_criticality(false);
    ext
}

/// Builds the Certificate Policies extension from dotted OID strings.
fn build_policies_extension(oids: &[String]) -> Result<CustomExtension> {
    let parsed: Vec<Vec<u64>> = oids
        .iter()
        .map(|oid| {
            oid.split('.')
                .map(|part| {
                    part.parse::<u64>()
                        .map_err(|_| Error::Validation(format!("invalid policy OID: {oid}")))
                })
                .collect()
        })
        .collect::<Result<_>>()?;

    let content = yasna::construct_der(|writer| {
        writer.write_sequence_of(|writer| {
            for oid in &parsed {
                writer.next().write_sequence(|writer| {
                    writer.next().write_oid(&ObjectIdentifier::from_slice(oid));
                });
            }
        });
    });

    let mut ext = CustomExtension::from_oid_content(OID_CERTIFICATE_POLICIES, content);
    ext.set_criticality(false);
    Ok(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key_pair;
    use crate::types::KeyAlgorithm;

    fn test_ca() -> (Certificate, KeyPair) {
        let key_pair = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let dn = DistinguishedName::common_name("Test Root CA");

        let mut params = CertificateParams::default();
        params.distinguished_name = to_rcgen_dn(&dn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = Utc::now();
        params.not_before = to_rcgen_time(now - Duration::hours(1)).unwrap();
        params.not_after = to_rcgen_time(now + Duration::days(3650)).unwrap();

        let cert = params.self_signed(&key_pair).unwrap();
        (Certificate::from_der(cert.der()).unwrap(), key_pair)
    }

    fn sign_test_leaf(policy: &IssuePolicy) -> Certificate {
        let (ca_cert, ca_key) = test_ca();
        let leaf_key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(
            &DistinguishedName::common_name("leaf.example.com"),
            &leaf_key,
            &[SubjectAltName::Dns("leaf.example.com".into())],
        )
        .unwrap();

        sign_certificate(
            &csr.pem,
            &ca_cert,
            &ca_key,
            &SerialNumber::generate(),
            Utc::now(),
            365,
            false,
            &[],
            policy,
        )
        .unwrap()
    }

    #[test]
    fn generate_csr_produces_pem() {
        let key_pair = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(
            &DistinguishedName::parse("CN=host.example.com, O=Example").unwrap(),
            &key_pair,
            &[SubjectAltName::Dns("host.example.com".into())],
        )
        .unwrap();

        assert!(csr.pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(!csr.der.is_empty());
    }

    #[test]
    fn sign_certificate_sets_issuer_and_serial() {
        let serial = SerialNumber::generate();
        let (ca_cert, ca_key) = test_ca();
        let leaf_key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(
            &DistinguishedName::common_name("leaf.example.com"),
            &leaf_key,
            &[],
        )
        .unwrap();

        let cert = sign_certificate(
            &csr.pem,
            &ca_cert,
            &ca_key,
            &serial,
            Utc::now(),
            365,
            false,
            &[],
            &IssuePolicy::default(),
        )
        .unwrap();

        assert_eq!(cert.subject(), "CN=leaf.example.com");
        assert_eq!(cert.issuer(), ca_cert.subject());
        assert_eq!(cert.serial(), &serial);
    }

    #[test]
    fn sign_certificate_validity_window_matches_request() {
        let cert = sign_test_leaf(&IssuePolicy::default());
        let window = cert.not_after() - cert.not_before();
        // 365 days plus the one-hour skew allowance
        assert!((window.num_days() - 365).abs() <= 1);
    }

    #[test]
    fn sign_certificate_preserves_csr_sans() {
        let cert = sign_test_leaf(&IssuePolicy::default());
        assert!(cert
            .san()
            .iter()
            .any(|san| matches!(san, SubjectAltName::Dns(d) if d == "leaf.example.com")));
    }

    #[test]
    fn sign_certificate_san_override() {
        let (ca_cert, ca_key) = test_ca();
        let leaf_key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(
            &DistinguishedName::common_name("leaf"),
            &leaf_key,
            &[SubjectAltName::Dns("from-csr.example.com".into())],
        )
        .unwrap();

        let cert = sign_certificate(
            &csr.pem,
            &ca_cert,
            &ca_key,
            &SerialNumber::generate(),
            Utc::now(),
            30,
            false,
            &[SubjectAltName::Dns("override.example.com".into())],
            &IssuePolicy::default(),
        )
        .unwrap();

        assert!(cert
            .san()
            .iter()
            .any(|san| matches!(san, SubjectAltName::Dns(d) if d == "override.example.com")));
        assert!(!cert
            .san()
            .iter()
            .any(|san| matches!(san, SubjectAltName::Dns(d) if d == "from-csr.example.com")));
    }

    #[test]
    fn sign_certificate_embeds_distribution_extensions() {
        use x509_parser::prelude::*;

        let policy = IssuePolicy {
            crl_url: Some("http://pki.example.com/crl".into()),
            ocsp_url: Some("http://pki.example.com/ocsp".into()),
            policy_oids: vec!["2.23.140.1.2.1".into()],
            ..IssuePolicy::default()
        };
        let cert = sign_test_leaf(&policy);

        let (_, parsed) = X509Certificate::from_der(cert.der()).unwrap();
        let oids: Vec<String> = parsed
            .extensions()
            .iter()
            .map(|ext| ext.oid.to_id_string())
            .collect();

        assert!(oids.contains(&"2.5.29.31".to_string()), "missing CDP: {oids:?}");
        assert!(
            oids.contains(&"1.3.6.1.5.5.7.1.1".to_string()),
            "missing AIA: {oids:?}"
        );
        assert!(
            oids.contains(&"2.5.29.32".to_string()),
            "missing certificatePolicies: {oids:?}"
        );
        // SKI and AKI are always present
        assert!(oids.contains(&"2.5.29.14".to_string()));
        assert!(oids.contains(&"2.5.29.35".to_string()));
    }

    #[test]
    fn sign_ca_certificate_sets_constraints() {
        use x509_parser::prelude::*;

        let (ca_cert, ca_key) = test_ca();
        let sub_key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = generate_csr(
            &DistinguishedName::common_name("Test Issuing CA"),
            &sub_key,
            &[],
        )
        .unwrap();

        let policy = IssuePolicy {
            profile: CertProfile::Ca,
            path_len: Some(0),
            ..IssuePolicy::default()
        };

        let cert = sign_certificate(
            &csr.pem,
            &ca_cert,
            &ca_key,
            &SerialNumber::generate(),
            Utc::now(),
            1825,
            true,
            &[],
            &policy,
        )
        .unwrap();

        let (_, parsed) = X509Certificate::from_der(cert.der()).unwrap();
        let bc = parsed.basic_constraints().unwrap().unwrap();
        assert!(bc.critical);
        assert!(bc.value.ca);
        assert_eq!(bc.value.path_len_constraint, Some(0));
    }

    #[test]
    fn sign_certificate_rejects_malformed_csr() {
        let (ca_cert, ca_key) = test_ca();
        let result = sign_certificate(
            "not a csr",
            &ca_cert,
            &ca_key,
            &SerialNumber::generate(),
            Utc::now(),
            30,
            false,
            &[],
            &IssuePolicy::default(),
        );
        assert!(matches!(result, Err(Error::CsrParse(_))));
    }

    #[test]
    fn parse_certificate_dates_round_trip() {
        let cert = sign_test_leaf(&IssuePolicy::default());
        let (not_before, not_after) = parse_certificate_dates(&cert.pem()).unwrap();
        assert_eq!(not_before, cert.not_before());
        assert_eq!(not_after, cert.not_after());
    }

    #[test]
    fn policies_extension_rejects_bad_oid() {
        let result = build_policies_extension(&["2.5.not-a-number".to_string()]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
