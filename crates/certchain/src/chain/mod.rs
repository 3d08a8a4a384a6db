use serde::Serialize;

use crate::certificate::{Certificate, DistinguishedName};

pub mod builder;
pub mod validator;

pub use builder::{ChainBuilder, MAX_CHAIN_DEPTH};
pub use validator::ChainValidator;

/// An ordered certificate chain, leaf first.
///
/// `complete` and `missing` are only meaningful after `ChainValidator::validate`.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub certificates: Vec<Certificate>,
    pub complete: bool,
    pub missing: Vec<MissingCertDescriptor>,
}

impl Chain {
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    pub fn tail(&self) -> Option<&Certificate> {
        self.certificates.last()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// What is known about the issuer the chain is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingCertDescriptor {
    #[serde(rename = "forCertificateSubjectCN")]
    pub for_certificate_subject_cn: String,
    #[serde(rename = "expectedIssuerDN")]
    pub expected_issuer_dn: DistinguishedName,
    pub authority_key_identifier: Option<String>,
    pub aia_urls: Vec<String>,
}

impl MissingCertDescriptor {
    pub fn for_certificate(certificate: &Certificate) -> Self {
        Self {
            for_certificate_subject_cn: certificate
                .common_name()
                .unwrap_or("Unknown")
                .to_string(),
            expected_issuer_dn: certificate.issuer.clone(),
            authority_key_identifier: certificate.authority_key_identifier.clone(),
            aia_urls: certificate.aia_urls.clone(),
        }
    }

    /// Whether `candidate` looks like the certificate this descriptor is waiting for
    pub fn is_satisfied_by(&self, candidate: &Certificate) -> bool {
        match (&self.authority_key_identifier, &candidate.subject_key_identifier) {
            (Some(aki), Some(ski)) => aki == ski,
            _ => candidate.subject.loosely_matches(&self.expected_issuer_dn),
        }
    }
}

/// True when `issuer` issued `subject`.
///
/// Key identifiers decide when both are present; otherwise the issuer DN of
/// `subject` is compared loosely with the subject DN of `issuer`.
pub fn is_issuer_of(issuer: &Certificate, subject: &Certificate) -> bool {
    match (
        &subject.authority_key_identifier,
        &issuer.subject_key_identifier,
    ) {
        (Some(aki), Some(ski)) => aki == ski,
        _ => subject.issuer.loosely_matches(&issuer.subject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_issuer_relation_follows_key_identifiers() {
        let chain = test_support::TestChain::new();
        let leaf = test_support::to_cert(&chain.leaf);
        let intermediate = test_support::to_cert(&chain.intermediate);
        let root = test_support::to_cert(&chain.root);

        assert!(is_issuer_of(&intermediate, &leaf));
        assert!(is_issuer_of(&root, &intermediate));
        assert!(!is_issuer_of(&leaf, &intermediate));
        assert!(!is_issuer_of(&root, &leaf));
    }

    #[test]
    fn test_key_identifiers_override_matching_names() {
        let chain = test_support::TestChain::new();
        let leaf = test_support::to_cert(&chain.leaf);

        // Same DN as the real intermediate, different key
        let impostor_key = test_support::ec_key();
        let impostor = test_support::to_cert(&test_support::issue(
            "Intermediate R3",
            &impostor_key,
            Some((&chain.root, &chain.root_key)),
            true,
            None,
        ));

        assert!(leaf.issuer.loosely_matches(&impostor.subject));
        assert!(!is_issuer_of(&impostor, &leaf));
    }

    #[test]
    fn test_missing_descriptor_for_tail() {
        let chain = test_support::TestChain::new();
        let intermediate = test_support::to_cert(&chain.intermediate);
        let root = test_support::to_cert(&chain.root);

        let descriptor = MissingCertDescriptor::for_certificate(&intermediate);
        assert_eq!(descriptor.for_certificate_subject_cn, "Intermediate R3");
        assert_eq!(
            descriptor.expected_issuer_dn.common_name(),
            Some("ISRG Root X1")
        );
        assert_eq!(
            descriptor.aia_urls,
            vec![
                test_support::INTERMEDIATE_AIA_URL.to_string(),
                test_support::OCSP_URL.to_string()
            ]
        );
        assert!(descriptor.is_satisfied_by(&root));
        assert!(!descriptor.is_satisfied_by(&intermediate));
    }
}
