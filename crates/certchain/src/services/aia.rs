use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use tracing::{debug, info, warn};

use crate::{
    certificate::{Certificate, SourceFormat},
    chain::MissingCertDescriptor,
    codec::{CertificateCodec, InputFormat},
    config::{CaRepository, Network},
    error::{ChainError, ChainResult},
};

/// Downloads the raw body behind an issuer URL.
#[async_trait]
pub trait IssuerFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ChainResult<Bytes>;
}

/// `IssuerFetcher` over HTTPS with bounded time and redirects.
/// The fetcher's own TLS connections are verified.
pub struct HttpIssuerFetcher {
    client: reqwest::Client,
}

impl HttpIssuerFetcher {
    pub fn new(network: &Network) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network.aia_timeout_secs))
            .redirect(Policy::limited(network.aia_max_redirects))
            .user_agent(&*network.user_agent)
            .build()
            .map_err(|e| ChainError::InvalidRequest(format!("unable to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl IssuerFetcher for HttpIssuerFetcher {
    async fn fetch(&self, url: &str) -> ChainResult<Bytes> {
        let failed = |reason: String| ChainError::AiaFetchFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }

        let body = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        if body.is_empty() {
            return Err(failed("empty response body".to_string()));
        }

        Ok(body)
    }
}

/// Finds the certificate a `MissingCertDescriptor` is waiting for.
///
/// AIA URLs are tried first, in order. When none yields a certificate the
/// configured CA repository is searched for one that actually matches the
/// descriptor.
pub struct AiaResolver {
    fetcher: Arc<dyn IssuerFetcher>,
    repository: CaRepository,
    codec: CertificateCodec,
}

impl AiaResolver {
    pub fn new(fetcher: Arc<dyn IssuerFetcher>, repository: CaRepository) -> Self {
        Self {
            fetcher,
            repository,
            codec: CertificateCodec::new(),
        }
    }

    pub async fn resolve_missing(&self, descriptor: &MissingCertDescriptor) -> Option<Certificate> {
        for url in &descriptor.aia_urls {
            match self.fetch_certificates(url).await {
                Ok(certificates) => {
                    let position = certificates
                        .iter()
                        .position(|c| descriptor.is_satisfied_by(c))
                        .unwrap_or(0);
                    if let Some(certificate) = certificates.into_iter().nth(position) {
                        info!(
                            url = url.as_str(),
                            fingerprint = certificate.fingerprint_sha256.as_str(),
                            "fetched issuer from AIA"
                        );
                        return Some(certificate);
                    }
                }
                Err(err) => warn!(url = url.as_str(), error = %err, "AIA fetch failed"),
            }
        }

        self.search_repository(descriptor).await
    }

    async fn search_repository(&self, descriptor: &MissingCertDescriptor) -> Option<Certificate> {
        debug!(
            version = self.repository.version,
            issuer = %descriptor.expected_issuer_dn,
            "searching CA repository"
        );

        for url in self.repository.urls() {
            let certificates = match self.fetch_certificates(url).await {
                Ok(certificates) => certificates,
                Err(err) => {
                    warn!(url, error = %err, "CA repository fetch failed");
                    continue;
                }
            };

            if let Some(certificate) = certificates
                .into_iter()
                .find(|c| descriptor.is_satisfied_by(c))
            {
                info!(
                    url,
                    fingerprint = certificate.fingerprint_sha256.as_str(),
                    "found issuer in CA repository"
                );
                return Some(certificate);
            }
        }

        None
    }

    /// DER, PEM and PKCS7 bodies are all accepted
    async fn fetch_certificates(&self, url: &str) -> ChainResult<Vec<Certificate>> {
        let body = self.fetcher.fetch(url).await?;

        let decoded = self
            .codec
            .decode(&body, InputFormat::Auto, Some(url), None)
            .map_err(|e| ChainError::AiaFetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(decoded
            .certificates
            .into_iter()
            .map(|mut certificate| {
                certificate.source_format = SourceFormat::Aia;
                certificate
            })
            .collect())
    }
}
