use tracing::debug;

use super::{Chain, MissingCertDescriptor};

/// Decides whether an ordered chain ends in a root and describes the gap if not.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainValidator;

impl ChainValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, mut chain: Chain) -> Chain {
        chain.missing.clear();

        let gap = match chain.tail() {
            None => {
                chain.complete = false;
                return chain;
            }
            Some(tail) if tail.is_self_signed() => None,
            Some(tail) => Some(MissingCertDescriptor::for_certificate(tail)),
        };

        chain.complete = gap.is_none();
        chain.missing.extend(gap);

        debug!(
            certificates = chain.len(),
            complete = chain.complete,
            missing = chain.missing.len(),
            "validated chain"
        );

        chain
    }
}
