//! Resolves, completes and re-encodes X.509 certificate chains.
//!
//! Chains come from a live TLS handshake or an uploaded PEM, DER, PKCS7 or
//! PKCS12 file. They are ordered leaf first, checked for a self-signed root,
//! completed through one Authority Information Access hop and exported as
//! PEM, PKCS7 or PKCS12 bundles. [`services::ChainResolutionService`] is the
//! entry point for the four operations.

pub mod certificate;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod services;

#[cfg(test)]
mod test_support;

pub use certificate::{Certificate, CertificateInfo, DistinguishedName};
pub use chain::{Chain, MissingCertDescriptor};
pub use error::{ChainError, ChainResult};
