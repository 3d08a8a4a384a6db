//! Certificate and key fixtures generated at test time.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, SubjectAlternativeName,
            SubjectKeyIdentifier,
        },
        X509Builder, X509Extension, X509Name, X509NameBuilder, X509NameRef, X509,
    },
};

use crate::{
    certificate::{Certificate, SourceFormat},
    error::{ChainError, ChainResult},
    services::aia::IssuerFetcher,
};

pub const LEAF_AIA_URL: &str = "http://r3.i.lencr.test/";
pub const INTERMEDIATE_AIA_URL: &str = "http://x1.i.lencr.test/";
pub const OCSP_URL: &str = "http://ocsp.lencr.test/";

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.append_entry_by_text("O", "certchain tests").unwrap();
    builder.build()
}

/// Issues a certificate for `cn`. Without an issuer the certificate is self-signed.
pub fn issue(
    cn: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
    aia_url: Option<&str>,
) -> X509 {
    let subject = name(cn);
    let issuer_name = issuer.map_or(&*subject, |(cert, _)| cert.subject_name());
    let signing_key = issuer.map_or(key, |(_, issuer_key)| issuer_key);

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_issuer_name(issuer_name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(90).unwrap())
        .unwrap();

    let constraints = if ca {
        BasicConstraints::new().critical().ca().build().unwrap()
    } else {
        BasicConstraints::new().build().unwrap()
    };
    builder.append_extension(constraints).unwrap();

    let issuer_ref = issuer.map(|(cert, _)| &**cert);
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(issuer_ref, None))
        .unwrap();
    builder.append_extension(ski).unwrap();

    if issuer.is_some() {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(true)
            .build(&builder.x509v3_context(issuer_ref, None))
            .unwrap();
        builder.append_extension(aki).unwrap();
    }

    if !ca {
        let san = SubjectAlternativeName::new()
            .dns(cn)
            .build(&builder.x509v3_context(issuer_ref, None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }

    if let Some(url) = aia_url {
        #[allow(deprecated)]
        let aia = X509Extension::new_nid(
            None,
            Some(&builder.x509v3_context(issuer_ref, None)),
            Nid::INFO_ACCESS,
            &format!("OCSP;URI:{OCSP_URL},caIssuers;URI:{url}"),
        )
        .unwrap();
        builder.append_extension(aia).unwrap();
    }

    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A certificate with arbitrary subject/issuer names and no key identifiers,
/// so issuer relations fall back to DN comparison.
pub fn issue_named(subject: &X509NameRef, issuer: &X509NameRef, key: &PKey<Private>) -> X509 {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn to_cert(x509: &X509) -> Certificate {
    Certificate::from_x509(x509, SourceFormat::Pem).unwrap()
}

/// "ISRG Root X1" -> "Intermediate R3" -> "example.com"
pub struct TestChain {
    pub root: X509,
    pub root_key: PKey<Private>,
    pub intermediate: X509,
    pub intermediate_key: PKey<Private>,
    pub leaf: X509,
    pub leaf_key: PKey<Private>,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_leaf_key(ec_key())
    }

    pub fn with_leaf_key(leaf_key: PKey<Private>) -> Self {
        let root_key = ec_key();
        let root = issue("ISRG Root X1", &root_key, None, true, None);

        let intermediate_key = ec_key();
        let intermediate = issue(
            "Intermediate R3",
            &intermediate_key,
            Some((&root, &root_key)),
            true,
            Some(INTERMEDIATE_AIA_URL),
        );

        let leaf = issue(
            "example.com",
            &leaf_key,
            Some((&intermediate, &intermediate_key)),
            false,
            Some(LEAF_AIA_URL),
        );

        Self {
            root,
            root_key,
            intermediate,
            intermediate_key,
            leaf,
            leaf_key,
        }
    }

    pub fn certificates(&self) -> Vec<Certificate> {
        vec![
            to_cert(&self.leaf),
            to_cert(&self.intermediate),
            to_cert(&self.root),
        ]
    }

    pub fn pem_bundle(&self) -> Vec<u8> {
        [&self.leaf, &self.intermediate, &self.root]
            .iter()
            .flat_map(|cert| cert.to_pem().unwrap())
            .collect()
    }
}

/// `count` certificates where certificate `i` names `i + 1` as its issuer and
/// the last one points back at the first.
pub fn cyclic_certificates(count: usize) -> Vec<Certificate> {
    let key = ec_key();
    (0..count)
        .map(|i| {
            let subject = name(&format!("cycle-{i}"));
            let issuer = name(&format!("cycle-{}", (i + 1) % count));
            to_cert(&issue_named(&subject, &issuer, &key))
        })
        .collect()
}

/// Serves canned bodies and records every requested URL
#[derive(Default)]
pub struct StaticFetcher {
    bodies: HashMap<String, Bytes>,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn with(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssuerFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> ChainResult<Bytes> {
        self.requested.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| ChainError::AiaFetchFailed {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }
}
