use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    certificate::{Certificate, CertificateInfo},
    chain::{Chain, ChainBuilder, ChainValidator, MissingCertDescriptor},
    codec::{BundleFormat, CertificateCodec, Decoded, InputFormat, PrivateKeyMaterial},
    config::Config,
    error::{ChainError, ChainResult},
};

use super::{
    aia::{AiaResolver, HttpIssuerFetcher, IssuerFetcher},
    keypair::{KeyMatchDetails, KeyPairVerifier, VerificationMethod},
    live_fetch::LiveChainFetcher,
};

/// Friendly name stored in PKCS12 bundles when the caller gives none
const DEFAULT_ALIAS: &str = "certificate";

/// An uploaded file. The content is never printed by `Debug`.
#[derive(Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub content: Bytes,
}

impl Upload {
    pub fn new(filename: Option<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename,
            content: content.into(),
        }
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("len", &self.content.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Url,
    File,
    /// `url` when a URL is given, `file` otherwise
    #[default]
    Auto,
}

/// Where `ChainResolutionService::resolve` reads certificates from
pub enum ChainSource {
    Live {
        host: String,
        port: u16,
    },
    Upload {
        content: Bytes,
        format: InputFormat,
        filename: Option<String>,
        password: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub chain: Chain,
    pub has_private_key: bool,
}

#[derive(Default)]
pub struct ResolveChainRequest {
    pub input_type: InputType,
    pub url: Option<String>,
    pub port: Option<u16>,
    pub certificate_file: Option<Upload>,
    pub format: InputFormat,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveChainResponse {
    /// `url` or `file`, never `auto`
    pub input_type: InputType,
    pub domain: String,
    pub chain: Vec<CertificateInfo>,
    pub complete: bool,
    pub missing: Vec<MissingCertDescriptor>,
    pub has_private_key: bool,
    pub total_certificates: usize,
    pub missing_count: usize,
}

#[derive(Debug, Serialize)]
pub struct FetchMissingResponse {
    pub certificate: String,
    pub info: CertificateInfo,
}

#[derive(Default)]
pub struct BuildBundleRequest {
    /// PEM encoded certificates, leaf first
    pub certificates: Vec<String>,
    pub format: BundleFormat,
    pub password: Option<String>,
    pub private_key: Option<Upload>,
    pub alias: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildBundleResponse {
    pub format: BundleFormat,
    pub filename: String,
    /// Base64 of the bundle bytes
    pub content: String,
    pub mime_type: String,
    pub size: usize,
}

pub struct VerifyKeyPairRequest {
    pub certificate: Upload,
    pub private_key: Upload,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyKeyPairResponse {
    #[serde(rename = "match")]
    pub is_match: bool,
    pub verification_method: VerificationMethod,
    pub details: KeyMatchDetails,
    pub certificate_info: CertificateInfo,
}

/// Entry point for the four chain operations.
///
/// Holds no per-request state; one instance can serve concurrent requests.
pub struct ChainResolutionService {
    config: Arc<Config>,
    codec: CertificateCodec,
    builder: ChainBuilder,
    validator: ChainValidator,
    live: LiveChainFetcher,
    aia: AiaResolver,
    keys: KeyPairVerifier,
}

impl ChainResolutionService {
    /// Service fetching AIA issuers over HTTP
    pub fn from_config(config: Arc<Config>) -> ChainResult<Self> {
        let fetcher = Arc::new(HttpIssuerFetcher::new(&config.network)?);
        Ok(Self::new(config, fetcher))
    }

    pub fn new(config: Arc<Config>, fetcher: Arc<dyn IssuerFetcher>) -> Self {
        let live = LiveChainFetcher::new(Duration::from_secs(config.network.tls_timeout_secs));
        let aia = AiaResolver::new(fetcher, config.ca_repository.clone());

        Self {
            config,
            codec: CertificateCodec::new(),
            builder: ChainBuilder::new(),
            validator: ChainValidator::new(),
            live,
            aia,
            keys: KeyPairVerifier::new(),
        }
    }

    /// Reads, orders and validates a chain, then tries one AIA hop for the
    /// missing issuer.
    pub async fn resolve(&self, source: ChainSource) -> ChainResult<Resolution> {
        let (certificates, has_private_key) = match source {
            ChainSource::Live { host, port } => (self.live.fetch(&host, port).await?, false),
            ChainSource::Upload {
                content,
                format,
                filename,
                password,
            } => {
                self.check_upload(&content)?;
                let Decoded {
                    certificates,
                    private_key,
                    ..
                } = self.codec.decode(
                    &content,
                    format,
                    filename.as_deref(),
                    password.as_deref(),
                )?;
                // only the presence of a key is reported
                (certificates, private_key.is_some())
            }
        };

        let mut chain = self.validator.validate(self.builder.build(certificates));

        if let Some(descriptor) = chain.missing.first().cloned() {
            if let Some(issuer) = self.aia.resolve_missing(&descriptor).await {
                chain.certificates.push(issuer);
                chain = self.validator.validate(chain);
            }
        }

        info!(
            certificates = chain.len(),
            complete = chain.complete,
            missing = chain.missing.len(),
            "resolved chain"
        );

        Ok(Resolution {
            chain,
            has_private_key,
        })
    }

    pub async fn resolve_chain(
        &self,
        request: ResolveChainRequest,
    ) -> ChainResult<ResolveChainResponse> {
        let input_type = match request.input_type {
            InputType::Auto if request.url.is_some() => InputType::Url,
            InputType::Auto => InputType::File,
            input_type => input_type,
        };

        let (source, domain) = match input_type {
            InputType::Url => {
                let url = request
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| ChainError::InvalidRequest("url is required".to_string()))?;

                let (host, url_port) = extract_domain(url);
                if host.is_empty() {
                    return Err(ChainError::InvalidRequest(format!(
                        "no host found in url {url}"
                    )));
                }
                let port = request
                    .port
                    .or(url_port)
                    .unwrap_or(self.config.network.default_port);

                debug!(host = host.as_str(), port, "resolving live chain");
                (
                    ChainSource::Live {
                        host: host.clone(),
                        port,
                    },
                    Some(host),
                )
            }
            _ => {
                let upload = request.certificate_file.ok_or_else(|| {
                    ChainError::InvalidRequest("certificate file is required".to_string())
                })?;
                (
                    ChainSource::Upload {
                        content: upload.content,
                        format: request.format,
                        filename: upload.filename,
                        password: request.password,
                    },
                    None,
                )
            }
        };

        let Resolution {
            chain,
            has_private_key,
        } = self.resolve(source).await?;

        let domain = domain
            .or_else(|| chain.leaf().and_then(Certificate::common_name).map(String::from))
            .unwrap_or_default();
        let infos = chain
            .certificates
            .iter()
            .map(Certificate::info)
            .collect::<ChainResult<Vec<_>>>()?;

        Ok(ResolveChainResponse {
            input_type,
            domain,
            total_certificates: infos.len(),
            missing_count: chain.missing.len(),
            chain: infos,
            complete: chain.complete,
            missing: chain.missing,
            has_private_key,
        })
    }

    /// Fetches the issuer of the first certificate in `certificate`
    pub async fn fetch_missing(&self, certificate: &[u8]) -> ChainResult<FetchMissingResponse> {
        self.check_upload(certificate)?;
        let decoded = self
            .codec
            .decode(certificate, InputFormat::Auto, None, None)?;
        let subject = decoded
            .certificates
            .first()
            .ok_or(ChainError::NoCertificatesFound)?;

        let descriptor = MissingCertDescriptor::for_certificate(subject);
        let issuer = self
            .aia
            .resolve_missing(&descriptor)
            .await
            .ok_or(ChainError::IssuerUnavailable)?;

        Ok(FetchMissingResponse {
            certificate: issuer.to_pem()?,
            info: issuer.info()?,
        })
    }

    pub fn build_bundle(&self, request: BuildBundleRequest) -> ChainResult<BuildBundleResponse> {
        if request.certificates.is_empty() {
            return Err(ChainError::InvalidRequest(
                "at least one certificate is required".to_string(),
            ));
        }

        let password = request.password.as_deref().filter(|p| !p.is_empty());
        if request.format == BundleFormat::Pkcs12 {
            if password.is_none() {
                return Err(ChainError::PasswordRequired);
            }
            if request.private_key.is_none() {
                return Err(ChainError::PrivateKeyRequired);
            }
        }

        let mut certificates = Vec::with_capacity(request.certificates.len());
        for pem in &request.certificates {
            self.check_upload(pem.as_bytes())?;
            let decoded = self
                .codec
                .decode(pem.as_bytes(), InputFormat::Auto, None, None)?;
            certificates.extend(decoded.certificates);
        }

        let private_key = match &request.private_key {
            Some(upload) => {
                self.check_upload(&upload.content)?;
                Some(PrivateKeyMaterial::from_bytes(&upload.content)?)
            }
            None => None,
        };

        let alias = request
            .alias
            .as_deref()
            .or_else(|| certificates.first().and_then(Certificate::common_name))
            .unwrap_or(DEFAULT_ALIAS);

        let bundle = self.codec.encode(
            &certificates,
            request.format,
            private_key.as_ref(),
            password,
            alias,
        )?;

        info!(
            format = %request.format,
            certificates = certificates.len(),
            size = bundle.len(),
            "built bundle"
        );

        Ok(BuildBundleResponse {
            format: request.format,
            filename: request.format.filename().to_string(),
            content: openssl::base64::encode_block(&bundle),
            mime_type: request.format.mime_type().to_string(),
            size: bundle.len(),
        })
    }

    pub fn verify_key_pair(
        &self,
        request: VerifyKeyPairRequest,
    ) -> ChainResult<VerifyKeyPairResponse> {
        self.check_upload(&request.certificate.content)?;
        self.check_upload(&request.private_key.content)?;

        let decoded = self.codec.decode(
            &request.certificate.content,
            InputFormat::Auto,
            request.certificate.filename.as_deref(),
            request.password.as_deref(),
        )?;
        let certificate = decoded
            .certificates
            .first()
            .ok_or(ChainError::NoCertificatesFound)?;

        let private_key = PrivateKeyMaterial::from_bytes(&request.private_key.content)?;
        let result = self
            .keys
            .verify(certificate, &private_key, request.password.as_deref())?;

        Ok(VerifyKeyPairResponse {
            is_match: result.is_match,
            verification_method: result.method,
            details: result.details,
            certificate_info: certificate.info()?,
        })
    }

    fn check_upload(&self, content: &[u8]) -> ChainResult<()> {
        let limit = self.config.limits.max_upload_bytes;
        if content.len() > limit {
            return Err(ChainError::InvalidRequest(format!(
                "upload of {} bytes exceeds the limit of {limit} bytes",
                content.len()
            )));
        }
        Ok(())
    }
}

/// Host and optional port of a URL or bare `host[:port]`
pub fn extract_domain(url: &str) -> (String, Option<u16>) {
    let url = url.trim();
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    // [::1]:8443
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').unwrap_or((bracketed, ""));
        let port = rest.strip_prefix(':').and_then(|p| p.parse().ok());
        return (host.to_string(), port);
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_ascii_lowercase(), Some(port)),
            Err(_) => (authority.to_ascii_lowercase(), None),
        },
        None => (authority.to_ascii_lowercase(), None),
    }
}
