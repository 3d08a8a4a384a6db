use thiserror::Error;

pub type ChainResult<T> = Result<T, ChainError>;

/// Every failure the engine can surface to the calling layer.
///
/// Messages never carry private key bytes or passwords; openssl error stacks
/// are folded into the string payloads.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid input format: {0}")]
    InvalidInputFormat(String),

    #[error("password required for PKCS12 input")]
    PasswordRequired,

    #[error("failed to read PKCS12 input, check the password")]
    InvalidPassword,

    #[error("no certificates found in input")]
    NoCertificatesFound,

    #[error("failed to connect to {host}:{port} - {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("failed to fetch issuer certificate from {url}: {reason}")]
    AiaFetchFailed { url: String, reason: String },

    #[error("could not fetch issuer certificate: no AIA extension found or issuer certificate unavailable")]
    IssuerUnavailable,

    #[error("private key is required for PKCS12 format")]
    PrivateKeyRequired,

    #[error("failed to build bundle: {0}")]
    BundleBuildFailed(String),

    #[error("key verification inconclusive: neither modulus nor public key could be compared")]
    KeyVerificationInconclusive,
}

impl ChainError {
    /// Stable identifier for the error kind, used in JSON error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::InvalidRequest(_) => "invalid_request",
            ChainError::InvalidInputFormat(_) => "invalid_input_format",
            ChainError::PasswordRequired => "password_required",
            ChainError::InvalidPassword => "invalid_password",
            ChainError::NoCertificatesFound => "no_certificates_found",
            ChainError::ConnectionFailed { .. } => "connection_failed",
            ChainError::AiaFetchFailed { .. } => "aia_fetch_failed",
            ChainError::IssuerUnavailable => "issuer_unavailable",
            ChainError::PrivateKeyRequired => "private_key_required",
            ChainError::BundleBuildFailed(_) => "bundle_build_failed",
            ChainError::KeyVerificationInconclusive => "key_verification_inconclusive",
        }
    }

    /// HTTP-equivalent status for the excluded routing layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ChainError::InvalidRequest(_)
            | ChainError::InvalidInputFormat(_)
            | ChainError::PasswordRequired
            | ChainError::InvalidPassword
            | ChainError::NoCertificatesFound
            | ChainError::PrivateKeyRequired => 400,
            ChainError::IssuerUnavailable => 404,
            ChainError::ConnectionFailed { .. } | ChainError::AiaFetchFailed { .. } => 502,
            ChainError::BundleBuildFailed(_) | ChainError::KeyVerificationInconclusive => 500,
        }
    }
}
