pub mod aia;
pub mod keypair;
pub mod live_fetch;
pub mod logger;
pub mod resolution;

pub use aia::{AiaResolver, HttpIssuerFetcher, IssuerFetcher};
pub use keypair::{KeyMatchResult, KeyPairVerifier, VerificationMethod};
pub use live_fetch::LiveChainFetcher;
pub use resolution::{ChainResolutionService, ChainSource, Resolution};
