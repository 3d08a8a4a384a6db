use std::{
    collections::BTreeMap,
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

use bytes::Bytes;
use itertools::Itertools;
use openssl::{
    hash::MessageDigest,
    x509::{X509Ref, X509},
};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use x509_parser::{
    certificate::X509Certificate,
    extensions::{AuthorityInfoAccess, GeneralName, ParsedExtension},
    prelude::FromDer,
    x509::X509Name,
};

use crate::error::{ChainError, ChainResult};

/// `id-ad-caIssuers` access method of the AIA extension
const CA_ISSUERS_OID: &str = "1.3.6.1.5.5.7.48.2";

const SECONDS_PER_DAY: i64 = 86_400;

/// The DN attributes the engine keeps and compares, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DnAttribute {
    #[serde(rename = "CN")]
    CommonName,
    #[serde(rename = "O")]
    Organization,
    #[serde(rename = "OU")]
    OrganizationalUnit,
    #[serde(rename = "C")]
    Country,
    #[serde(rename = "ST")]
    State,
    #[serde(rename = "L")]
    Locality,
}

impl DnAttribute {
    pub const ALL: [DnAttribute; 6] = [
        DnAttribute::CommonName,
        DnAttribute::Organization,
        DnAttribute::OrganizationalUnit,
        DnAttribute::Country,
        DnAttribute::State,
        DnAttribute::Locality,
    ];

    fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            "2.5.4.3" => Some(DnAttribute::CommonName),
            "2.5.4.10" => Some(DnAttribute::Organization),
            "2.5.4.11" => Some(DnAttribute::OrganizationalUnit),
            "2.5.4.6" => Some(DnAttribute::Country),
            "2.5.4.8" => Some(DnAttribute::State),
            "2.5.4.7" => Some(DnAttribute::Locality),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            DnAttribute::CommonName => "CN",
            DnAttribute::Organization => "O",
            DnAttribute::OrganizationalUnit => "OU",
            DnAttribute::Country => "C",
            DnAttribute::State => "ST",
            DnAttribute::Locality => "L",
        }
    }
}

/// Subject or issuer identity, keyed by attribute code.
///
/// Only the first value of a repeated attribute is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistinguishedName(BTreeMap<DnAttribute, String>);

impl DistinguishedName {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (DnAttribute, S)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    fn from_x509_name(name: &X509Name<'_>) -> Self {
        let mut attributes = BTreeMap::new();
        for attr in name.iter_attributes() {
            let Some(key) = DnAttribute::from_oid(&attr.attr_type().to_id_string()) else {
                continue;
            };
            if let Ok(value) = attr.as_str() {
                attributes.entry(key).or_insert_with(|| value.to_string());
            }
        }
        Self(attributes)
    }

    pub fn get(&self, attribute: DnAttribute) -> Option<&str> {
        self.0.get(&attribute).map(String::as_str)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(DnAttribute::CommonName)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares two names on the attributes present on *both* sides.
    ///
    /// An attribute missing from either name is not a mismatch, so sparse
    /// names match more than they should. Kept for compatibility with
    /// existing diagnostics: issuer matches found this way can be false
    /// positives.
    pub fn loosely_matches(&self, other: &DistinguishedName) -> bool {
        DnAttribute::ALL.iter().all(|attr| {
            match (self.0.get(attr), other.0.get(attr)) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        })
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k.code(), v))
            .join(", ");
        f.write_str(&joined)
    }
}

/// Where a certificate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pem,
    Der,
    Pkcs7,
    Pkcs12,
    Live,
    Aia,
}

/// A decoded X.509 certificate. Immutable once built.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub version: u32,
    pub subject_key_identifier: Option<String>,
    pub authority_key_identifier: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub is_ca: bool,
    pub aia_urls: Vec<String>,
    pub fingerprint_sha256: String,
    pub fingerprint_sha1: String,
    /// DER encoding, used for fingerprints and re-export
    pub der: Bytes,
    pub source_format: SourceFormat,
}

impl Certificate {
    pub fn from_x509(x509: &X509Ref, source_format: SourceFormat) -> ChainResult<Self> {
        let der = x509
            .to_der()
            .map_err(|e| ChainError::InvalidInputFormat(e.to_string()))?;

        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| ChainError::InvalidInputFormat(format!("malformed certificate: {e}")))?;

        let mut subject_key_identifier = None;
        let mut authority_key_identifier = None;
        let mut subject_alt_names = Vec::new();
        let mut is_ca = false;
        let mut aia_urls = Vec::new();

        for extension in parsed.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(ski) => {
                    subject_key_identifier = Some(to_hex(ski.0));
                }
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    authority_key_identifier = aki.key_identifier.as_ref().map(|id| to_hex(id.0));
                }
                ParsedExtension::SubjectAlternativeName(san) => {
                    subject_alt_names = san.general_names.iter().filter_map(format_san).collect();
                }
                ParsedExtension::BasicConstraints(bc) => is_ca = bc.ca,
                ParsedExtension::AuthorityInfoAccess(aia) => aia_urls = collect_aia_urls(aia),
                _ => {}
            }
        }

        let validity = parsed.validity();
        let not_before = timestamp_to_datetime(validity.not_before.timestamp())?;
        let not_after = timestamp_to_datetime(validity.not_after.timestamp())?;

        let signature_algorithm = {
            let object = x509.signature_algorithm().object();
            object
                .nid()
                .short_name()
                .map_or_else(|_| object.to_string(), str::to_string)
        };

        Ok(Self {
            subject: DistinguishedName::from_x509_name(parsed.subject()),
            issuer: DistinguishedName::from_x509_name(parsed.issuer()),
            not_before,
            not_after,
            serial_number: to_hex(parsed.raw_serial()),
            signature_algorithm,
            version: parsed.version().0 + 1,
            subject_key_identifier,
            authority_key_identifier,
            subject_alt_names,
            is_ca,
            aia_urls,
            fingerprint_sha256: fingerprint(x509, MessageDigest::sha256())?,
            fingerprint_sha1: fingerprint(x509, MessageDigest::sha1())?,
            der: Bytes::from(der),
            source_format,
        })
    }

    pub fn from_der(der: &[u8], source_format: SourceFormat) -> ChainResult<Self> {
        let x509 = X509::from_der(der).map_err(|e| {
            ChainError::InvalidInputFormat(format!("failed to read DER certificate: {e}"))
        })?;
        Self::from_x509(&x509, source_format)
    }

    pub fn to_x509(&self) -> ChainResult<X509> {
        X509::from_der(&self.der).map_err(|e| ChainError::InvalidInputFormat(e.to_string()))
    }

    pub fn to_pem(&self) -> ChainResult<String> {
        let pem = self
            .to_x509()?
            .to_pem()
            .map_err(|e| ChainError::BundleBuildFailed(e.to_string()))?;
        String::from_utf8(pem).map_err(|e| ChainError::BundleBuildFailed(e.to_string()))
    }

    pub fn common_name(&self) -> Option<&str> {
        self.subject.common_name()
    }

    /// A root: subject and issuer match (loosely, see `DistinguishedName::loosely_matches`)
    pub fn is_self_signed(&self) -> bool {
        self.subject.loosely_matches(&self.issuer)
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    pub fn is_currently_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }

    /// Whole days left, truncated toward zero; negative once expired.
    pub fn days_until_expiry_at(&self, now: OffsetDateTime) -> i64 {
        (self.not_after.unix_timestamp() - now.unix_timestamp()) / SECONDS_PER_DAY
    }

    pub fn days_until_expiry(&self) -> i64 {
        self.days_until_expiry_at(OffsetDateTime::now_utc())
    }

    pub fn info(&self) -> ChainResult<CertificateInfo> {
        let now = OffsetDateTime::now_utc();
        Ok(CertificateInfo {
            subject: self.subject.clone(),
            issuer: self.issuer.clone(),
            validity: Validity {
                valid_from: format_datetime(self.not_before),
                valid_to: format_datetime(self.not_after),
                valid_from_timestamp: self.not_before.unix_timestamp(),
                valid_to_timestamp: self.not_after.unix_timestamp(),
                is_valid: self.is_valid_at(now),
                days_until_expiry: self.days_until_expiry_at(now),
            },
            serial_number: self.serial_number.clone(),
            signature_algorithm: self.signature_algorithm.clone(),
            version: self.version,
            subject_key_identifier: self.subject_key_identifier.clone(),
            authority_key_identifier: self.authority_key_identifier.clone(),
            subject_alt_names: self.subject_alt_names.clone(),
            aia_urls: self.aia_urls.clone(),
            fingerprints: Fingerprints {
                sha256: self.fingerprint_sha256.clone(),
                sha1: self.fingerprint_sha1.clone(),
            },
            is_ca: self.is_ca,
            pem: self.to_pem()?,
        })
    }
}

/// Serialized view of a certificate handed to the calling layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub validity: Validity,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub version: u32,
    pub subject_key_identifier: Option<String>,
    pub authority_key_identifier: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub aia_urls: Vec<String>,
    pub fingerprints: Fingerprints,
    #[serde(rename = "isCA")]
    pub is_ca: bool,
    pub pem: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub valid_from: String,
    pub valid_to: String,
    pub valid_from_timestamp: i64,
    pub valid_to_timestamp: i64,
    pub is_valid: bool,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fingerprints {
    pub sha256: String,
    pub sha1: String,
}

/// Uppercase hex without separators
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn fingerprint(x509: &X509Ref, digest: MessageDigest) -> ChainResult<String> {
    let bytes = x509
        .digest(digest)
        .map_err(|e| ChainError::InvalidInputFormat(e.to_string()))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

fn timestamp_to_datetime(ts: i64) -> ChainResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| ChainError::InvalidInputFormat(format!("invalid validity timestamp: {e}")))
}

fn format_datetime(date: OffsetDateTime) -> String {
    date.format(&Rfc3339)
        .unwrap_or_else(|_| date.unix_timestamp().to_string())
}

fn format_san(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(format!("DNS:{dns}")),
        GeneralName::RFC822Name(email) => Some(format!("email:{email}")),
        GeneralName::URI(uri) => Some(format!("URI:{uri}")),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => <[u8; 4]>::try_from(*bytes)
                .ok()
                .map(|b| format!("IP Address:{}", Ipv4Addr::from(b))),
            16 => <[u8; 16]>::try_from(*bytes)
                .ok()
                .map(|b| format!("IP Address:{}", Ipv6Addr::from(b))),
            _ => None,
        },
        _ => None,
    }
}

/// CA Issuers locations first, then any other http(s) location in the extension
fn collect_aia_urls(aia: &AuthorityInfoAccess<'_>) -> Vec<String> {
    let (ca_issuers, others): (Vec<_>, Vec<_>) = aia
        .accessdescs
        .iter()
        .partition(|desc| desc.access_method.to_id_string() == CA_ISSUERS_OID);

    ca_issuers
        .into_iter()
        .chain(others)
        .filter_map(|desc| match &desc.access_location {
            GeneralName::URI(uri) => Some(*uri),
            _ => None,
        })
        .filter(|uri| is_http_url(uri))
        .map(str::to_string)
        .unique()
        .collect()
}

pub(crate) fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
