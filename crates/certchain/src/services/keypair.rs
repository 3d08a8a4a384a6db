use openssl::{
    bn::BigNumRef,
    pkey::{HasPublic, PKeyRef},
};
use serde::Serialize;
use tracing::debug;

use crate::{
    certificate::{to_hex, Certificate},
    codec::PrivateKeyMaterial,
    error::{ChainError, ChainResult},
};

/// Hex characters of a modulus kept for display
const MODULUS_PREVIEW_LEN: usize = 64;
const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationMethod {
    Modulus,
    PublicKey,
    Ec,
}

/// Public material only: modulus previews are truncated, the key itself never appears
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMatchDetails {
    pub certificate_modulus: String,
    pub key_modulus: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulus_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_key_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_key_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMatchResult {
    pub is_match: bool,
    pub method: VerificationMethod,
    pub details: KeyMatchDetails,
}

/// Checks that a private key belongs to a certificate.
///
/// RSA moduli are compared first; if that does not establish a match the
/// DER-encoded public keys are compared, which also covers EC keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyPairVerifier;

impl KeyPairVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(
        &self,
        certificate: &Certificate,
        private_key: &PrivateKeyMaterial,
        password: Option<&str>,
    ) -> ChainResult<KeyMatchResult> {
        let certificate_key = certificate
            .to_x509()?
            .public_key()
            .map_err(|e| ChainError::InvalidInputFormat(format!("unusable certificate key: {e}")))?;
        let key = private_key.to_pkey(password)?;

        let mut method = VerificationMethod::Modulus;
        let mut details = KeyMatchDetails::default();
        let mut is_match = false;

        let certificate_modulus = rsa_modulus(&certificate_key);
        let key_modulus = rsa_modulus(&key);
        if key_modulus.is_none() && key.ec_key().is_ok() {
            method = VerificationMethod::Ec;
        }

        details.certificate_modulus = preview(certificate_modulus.as_deref());
        details.key_modulus = preview(key_modulus.as_deref());

        if let (Some(certificate_modulus), Some(key_modulus)) = (&certificate_modulus, &key_modulus)
        {
            is_match = certificate_modulus == key_modulus;
            details.modulus_match = Some(is_match);
        }

        if !is_match {
            match (certificate_key.public_key_to_der(), key.public_key_to_der()) {
                (Ok(certificate_der), Ok(key_der)) => {
                    is_match = certificate_der == key_der;
                    details.public_key_match = Some(is_match);
                    if method != VerificationMethod::Ec {
                        method = VerificationMethod::PublicKey;
                    }
                }
                _ if details.modulus_match.is_none() => {
                    return Err(ChainError::KeyVerificationInconclusive);
                }
                _ => {}
            }
        }

        if is_match {
            details.subject_key_identifier = certificate.subject_key_identifier.clone();
            details.authority_key_identifier = certificate.authority_key_identifier.clone();
        }

        debug!(
            fingerprint = certificate.fingerprint_sha256.as_str(),
            is_match,
            method = ?method,
            "verified key pair"
        );

        Ok(KeyMatchResult {
            is_match,
            method,
            details,
        })
    }
}

fn rsa_modulus<T: HasPublic>(key: &PKeyRef<T>) -> Option<String> {
    key.rsa().ok().map(|rsa| modulus_hex(rsa.n()))
}

fn modulus_hex(n: &BigNumRef) -> String {
    to_hex(&n.to_vec())
}

fn preview(modulus: Option<&str>) -> String {
    match modulus {
        Some(hex) => format!("{}...", &hex[..hex.len().min(MODULUS_PREVIEW_LEN)]),
        None => UNAVAILABLE.to_string(),
    }
}
