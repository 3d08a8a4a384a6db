use std::fmt;

use clap::ValueEnum;
use openssl::{
    pkcs12::Pkcs12,
    pkcs7::Pkcs7,
    pkey::{PKey, Private},
    stack::Stack,
    x509::X509,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    certificate::{Certificate, SourceFormat},
    error::{ChainError, ChainResult},
};

pub mod pkcs7;

const PEM_CERTIFICATE_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";
const PEM_PKCS7_MARKER: &[u8] = b"-----BEGIN PKCS7-----";
/// Leading bytes of a DER SEQUENCE with a two byte length
const DER_LONG_SEQUENCE: &[u8] = &[0x30, 0x82];
const DER_SEQUENCE: u8 = 0x30;

/// Format of an uploaded certificate file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pem,
    Der,
    Pkcs7,
    Pkcs12,
    #[default]
    Auto,
}

/// Output container for `CertificateCodec::encode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    #[default]
    Pem,
    Pkcs7,
    Pkcs12,
}

impl BundleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleFormat::Pem => "pem",
            BundleFormat::Pkcs7 => "pkcs7",
            BundleFormat::Pkcs12 => "pkcs12",
        }
    }

    pub fn filename(self) -> &'static str {
        match self {
            BundleFormat::Pem => "certificate_bundle.pem",
            BundleFormat::Pkcs7 => "certificate_bundle.p7b",
            BundleFormat::Pkcs12 => "certificate_bundle.pfx",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            BundleFormat::Pem => "application/x-pem-file",
            BundleFormat::Pkcs7 => "application/pkcs7-mime",
            BundleFormat::Pkcs12 => "application/x-pkcs12",
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key bytes (PEM or DER) scoped to one operation.
///
/// The buffer is zeroed on drop and never printed.
pub struct PrivateKeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
    pem: bool,
    encrypted: bool,
}

impl PrivateKeyMaterial {
    /// Accepts a PEM document holding a `... PRIVATE KEY` block, or raw DER.
    pub fn from_bytes(input: &[u8]) -> ChainResult<Self> {
        if contains(input, b"-----BEGIN ") {
            let text = std::str::from_utf8(input).map_err(|_| {
                ChainError::InvalidInputFormat("private key PEM is not valid UTF-8".to_string())
            })?;
            return find_private_key_block(text).ok_or_else(|| {
                ChainError::InvalidInputFormat("no private key block found".to_string())
            });
        }

        if input.first() != Some(&DER_SEQUENCE) {
            return Err(ChainError::InvalidInputFormat(
                "unrecognized private key encoding".to_string(),
            ));
        }

        Ok(Self {
            bytes: Zeroizing::new(input.to_vec()),
            pem: false,
            encrypted: false,
        })
    }

    fn from_pem_block(block: &str, label: &str) -> Self {
        Self {
            bytes: Zeroizing::new(block.as_bytes().to_vec()),
            pem: true,
            encrypted: label == "ENCRYPTED PRIVATE KEY" || block.contains("Proc-Type: 4,ENCRYPTED"),
        }
    }

    fn from_pkey(pkey: &PKey<Private>) -> ChainResult<Self> {
        let pem = pkey
            .private_key_to_pem_pkcs8()
            .map_err(|e| ChainError::InvalidInputFormat(format!("unusable private key: {e}")))?;

        Ok(Self {
            bytes: Zeroizing::new(pem),
            pem: true,
            encrypted: false,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Loads the key, decrypting it with `password` when it is encrypted.
    pub fn to_pkey(&self, password: Option<&str>) -> ChainResult<PKey<Private>> {
        let password = password.filter(|p| !p.is_empty());

        if self.pem {
            if !self.encrypted {
                return PKey::private_key_from_pem(&self.bytes).map_err(|e| {
                    ChainError::InvalidInputFormat(format!("unable to read private key: {e}"))
                });
            }
            let password = password.ok_or(ChainError::PasswordRequired)?;
            return PKey::private_key_from_pem_passphrase(&self.bytes, password.as_bytes())
                .map_err(|_| ChainError::InvalidPassword);
        }

        match PKey::private_key_from_der(&self.bytes) {
            Ok(pkey) => Ok(pkey),
            Err(e) => match password {
                Some(password) => {
                    PKey::private_key_from_pkcs8_passphrase(&self.bytes, password.as_bytes())
                        .map_err(|_| ChainError::InvalidPassword)
                }
                None => Err(ChainError::InvalidInputFormat(format!(
                    "unable to read private key: {e}"
                ))),
            },
        }
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyMaterial")
            .field("pem", &self.pem)
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

/// Result of decoding one input document
#[derive(Debug)]
pub struct Decoded {
    pub format: InputFormat,
    pub certificates: Vec<Certificate>,
    pub private_key: Option<PrivateKeyMaterial>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CertificateCodec;

impl CertificateCodec {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `auto` to a concrete format.
    ///
    /// Content that matches nothing is treated as PEM, which then yields
    /// `NoCertificatesFound`.
    pub fn detect_format(&self, content: &[u8], filename: Option<&str>) -> InputFormat {
        let extension = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        let extension = extension.as_deref();

        if contains(content, PEM_CERTIFICATE_MARKER) {
            return InputFormat::Pem;
        }

        if contains(content, PEM_PKCS7_MARKER) {
            return InputFormat::Pkcs7;
        }

        // A DER certificate also starts with 0x30 0x82, only trust the
        // sniff when the bytes are a PFX structure.
        if matches!(extension, Some("pfx" | "p12"))
            || (content.starts_with(DER_LONG_SEQUENCE) && Pkcs12::from_der(content).is_ok())
        {
            return InputFormat::Pkcs12;
        }

        if matches!(extension, Some("p7b" | "p7c")) {
            return InputFormat::Pkcs7;
        }

        if content.first() == Some(&DER_SEQUENCE) {
            if Pkcs7::from_der(content).is_ok() {
                return InputFormat::Pkcs7;
            }
            return InputFormat::Der;
        }

        InputFormat::Pem
    }

    pub fn decode(
        &self,
        input: &[u8],
        format: InputFormat,
        filename: Option<&str>,
        password: Option<&str>,
    ) -> ChainResult<Decoded> {
        let format = match format {
            InputFormat::Auto => self.detect_format(input, filename),
            format => format,
        };

        let (certificates, private_key) = match format {
            InputFormat::Pem | InputFormat::Auto => decode_pem(input)?,
            InputFormat::Der => (vec![decode_der(input)?], None),
            InputFormat::Pkcs7 => (decode_pkcs7(input)?, None),
            InputFormat::Pkcs12 => decode_pkcs12(input, password)?,
        };

        if certificates.is_empty() {
            return Err(ChainError::NoCertificatesFound);
        }

        debug!(
            format = ?format,
            certificates = certificates.len(),
            has_private_key = private_key.is_some(),
            "decoded certificate input"
        );

        Ok(Decoded {
            format,
            certificates,
            private_key,
        })
    }

    pub fn encode(
        &self,
        certificates: &[Certificate],
        format: BundleFormat,
        private_key: Option<&PrivateKeyMaterial>,
        password: Option<&str>,
        alias: &str,
    ) -> ChainResult<Vec<u8>> {
        match format {
            BundleFormat::Pem => {
                if certificates.is_empty() {
                    return Err(ChainError::NoCertificatesFound);
                }
                let pem = certificates
                    .iter()
                    .map(Certificate::to_pem)
                    .collect::<ChainResult<Vec<_>>>()?;
                Ok(pem.concat().into_bytes())
            }
            BundleFormat::Pkcs7 => {
                if certificates.is_empty() {
                    return Err(ChainError::NoCertificatesFound);
                }
                pkcs7::encode_certs_only(certificates)
            }
            BundleFormat::Pkcs12 => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or(ChainError::PasswordRequired)?;
                let private_key = private_key.ok_or(ChainError::PrivateKeyRequired)?;
                encode_pkcs12(certificates, private_key, password, alias)
            }
        }
    }
}

fn decode_pem(input: &[u8]) -> ChainResult<(Vec<Certificate>, Option<PrivateKeyMaterial>)> {
    let text = String::from_utf8_lossy(input);
    let mut certificates = Vec::new();
    let mut private_key = None;

    for block in pem_blocks(&text) {
        match block.label {
            "CERTIFICATE" => {
                let x509 = X509::from_pem(block.text.as_bytes()).map_err(|e| {
                    ChainError::InvalidInputFormat(format!("malformed PEM certificate: {e}"))
                })?;
                certificates.push(Certificate::from_x509(&x509, SourceFormat::Pem)?);
            }
            "PKCS7" => certificates.extend(decode_pkcs7(block.text.as_bytes())?),
            label if label.ends_with("PRIVATE KEY") && private_key.is_none() => {
                private_key = Some(PrivateKeyMaterial::from_pem_block(block.text, label));
            }
            _ => {}
        }
    }

    Ok((certificates, private_key))
}

fn decode_der(input: &[u8]) -> ChainResult<Certificate> {
    Certificate::from_der(input, SourceFormat::Der)
}

fn decode_pkcs7(input: &[u8]) -> ChainResult<Vec<Certificate>> {
    let pkcs7 = if contains(input, b"-----BEGIN") {
        Pkcs7::from_pem(input)
    } else {
        Pkcs7::from_der(input)
    }
    .map_err(|e| ChainError::InvalidInputFormat(format!("malformed PKCS7: {e}")))?;

    let Some(stack) = pkcs7.signed().and_then(|signed| signed.certificates()) else {
        return Ok(Vec::new());
    };

    stack
        .iter()
        .map(|x509| Certificate::from_x509(x509, SourceFormat::Pkcs7))
        .collect()
}

fn decode_pkcs12(
    input: &[u8],
    password: Option<&str>,
) -> ChainResult<(Vec<Certificate>, Option<PrivateKeyMaterial>)> {
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or(ChainError::PasswordRequired)?;

    let pkcs12 = Pkcs12::from_der(input)
        .map_err(|e| ChainError::InvalidInputFormat(format!("malformed PKCS12: {e}")))?;
    let parsed = pkcs12
        .parse2(password)
        .map_err(|_| ChainError::InvalidPassword)?;

    let mut certificates = Vec::new();
    if let Some(cert) = &parsed.cert {
        certificates.push(Certificate::from_x509(cert, SourceFormat::Pkcs12)?);
    }
    if let Some(ca) = &parsed.ca {
        for x509 in ca {
            certificates.push(Certificate::from_x509(x509, SourceFormat::Pkcs12)?);
        }
    }

    let private_key = parsed
        .pkey
        .as_ref()
        .map(PrivateKeyMaterial::from_pkey)
        .transpose()?;

    Ok((certificates, private_key))
}

fn encode_pkcs12(
    certificates: &[Certificate],
    private_key: &PrivateKeyMaterial,
    password: &str,
    alias: &str,
) -> ChainResult<Vec<u8>> {
    let Some((end_entity, rest)) = certificates.split_first() else {
        return Err(ChainError::NoCertificatesFound);
    };

    let pkey = private_key.to_pkey(Some(password))?;
    let cert = end_entity.to_x509()?;

    let build_failed = |e: openssl::error::ErrorStack| ChainError::BundleBuildFailed(e.to_string());

    let mut builder = Pkcs12::builder();
    builder.name(alias).pkey(&pkey).cert(&cert);

    if !rest.is_empty() {
        let mut ca = Stack::new().map_err(build_failed)?;
        for certificate in rest {
            ca.push(certificate.to_x509()?).map_err(build_failed)?;
        }
        builder.ca(ca);
    }

    builder
        .build2(password)
        .and_then(|pkcs12| pkcs12.to_der())
        .map_err(build_failed)
}

struct PemBlock<'a> {
    label: &'a str,
    /// The whole block, BEGIN and END lines included
    text: &'a str,
}

fn pem_blocks(text: &str) -> Vec<PemBlock<'_>> {
    const BEGIN: &str = "-----BEGIN ";
    const DASHES: &str = "-----";

    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(BEGIN) {
        let start = pos + offset;
        let label_start = start + BEGIN.len();
        let Some(label_len) = text[label_start..].find(DASHES) else {
            break;
        };
        let label = &text[label_start..label_start + label_len];

        let end_marker = format!("-----END {label}-----");
        let Some(end_offset) = text[label_start..].find(&end_marker) else {
            break;
        };
        let end = label_start + end_offset + end_marker.len();

        blocks.push(PemBlock {
            label,
            text: &text[start..end],
        });
        pos = end;
    }

    blocks
}

fn find_private_key_block(text: &str) -> Option<PrivateKeyMaterial> {
    pem_blocks(text)
        .into_iter()
        .find(|block| block.label.ends_with("PRIVATE KEY"))
        .map(|block| PrivateKeyMaterial::from_pem_block(block.text, block.label))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
