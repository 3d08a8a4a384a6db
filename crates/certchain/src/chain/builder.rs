use tracing::{debug, trace};

use super::{is_issuer_of, Chain};
use crate::certificate::Certificate;

/// Maximum number of issuer hops followed from the leaf
pub const MAX_CHAIN_DEPTH: usize = 5;

/// Orders a flat set of certificates leaf first.
///
/// Never rejects input: certificates that cannot be placed are appended in
/// their original order, so nothing is dropped and malformed (even cyclic)
/// input terminates within `MAX_CHAIN_DEPTH` hops.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainBuilder;

impl ChainBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, certificates: Vec<Certificate>) -> Chain {
        if certificates.is_empty() {
            return Chain::default();
        }

        let mut placed = vec![false; certificates.len()];
        let mut order = Vec::with_capacity(certificates.len());

        let leaf = Self::find_leaf(&certificates);
        placed[leaf] = true;
        order.push(leaf);

        let mut current = leaf;
        for _ in 0..MAX_CHAIN_DEPTH {
            let next = (0..certificates.len()).find(|&idx| {
                !placed[idx] && is_issuer_of(&certificates[idx], &certificates[current])
            });

            let Some(next) = next else {
                break;
            };

            trace!(from = current, to = next, "placed issuer");
            placed[next] = true;
            order.push(next);
            current = next;
        }

        let unplaced = placed.iter().filter(|p| !**p).count();
        if unplaced > 0 {
            debug!(unplaced, "appending certificates that could not be placed");
        }
        order.extend((0..certificates.len()).filter(|&idx| !placed[idx]));

        // Move the certificates into their final order without cloning
        let mut slots: Vec<Option<Certificate>> = certificates.into_iter().map(Some).collect();
        let ordered = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();

        Chain {
            certificates: ordered,
            complete: false,
            missing: Vec::new(),
        }
    }

    /// The first certificate that issued none of the others, or index 0
    fn find_leaf(certificates: &[Certificate]) -> usize {
        (0..certificates.len())
            .find(|&candidate| {
                !(0..certificates.len()).any(|other| {
                    other != candidate
                        && is_issuer_of(&certificates[candidate], &certificates[other])
                })
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn subjects(chain: &Chain) -> Vec<String> {
        chain
            .certificates
            .iter()
            .map(|c| c.common_name().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_orders_every_permutation() {
        let fixture = test_support::TestChain::new();
        let [leaf, intermediate, root]: [Certificate; 3] =
            fixture.certificates().try_into().unwrap();

        let permutations = [
            vec![leaf.clone(), intermediate.clone(), root.clone()],
            vec![leaf.clone(), root.clone(), intermediate.clone()],
            vec![intermediate.clone(), leaf.clone(), root.clone()],
            vec![intermediate.clone(), root.clone(), leaf.clone()],
            vec![root.clone(), leaf.clone(), intermediate.clone()],
            vec![root, intermediate, leaf],
        ];

        for input in permutations {
            let chain = ChainBuilder::new().build(input);
            assert_eq!(
                subjects(&chain),
                vec!["example.com", "Intermediate R3", "ISRG Root X1"]
            );
        }
    }

    #[test]
    fn test_unrelated_certificates_are_appended_in_input_order() {
        let fixture = test_support::TestChain::new();
        let stray_key = test_support::ec_key();
        let stray = test_support::to_cert(&test_support::issue(
            "stray.example.net",
            &stray_key,
            None,
            false,
            None,
        ));

        let chain = ChainBuilder::new().build(vec![
            test_support::to_cert(&fixture.intermediate),
            test_support::to_cert(&fixture.leaf),
            stray,
        ]);

        assert_eq!(
            subjects(&chain),
            vec!["example.com", "Intermediate R3", "stray.example.net"]
        );
    }

    #[test]
    fn test_cyclic_input_terminates_at_depth_limit() {
        let certificates = test_support::cyclic_certificates(10);
        let fingerprints: Vec<_> = certificates
            .iter()
            .map(|c| c.fingerprint_sha256.clone())
            .collect();

        let chain = ChainBuilder::new().build(certificates);

        assert_eq!(chain.len(), 10);
        // No unique leaf: the first certificate starts the chain, then
        // MAX_CHAIN_DEPTH hops, then the rest verbatim.
        assert_eq!(
            chain
                .certificates
                .iter()
                .map(|c| c.fingerprint_sha256.clone())
                .collect::<Vec<_>>(),
            fingerprints
        );
        assert_eq!(
            subjects(&chain)[..MAX_CHAIN_DEPTH + 1],
            ["cycle-0", "cycle-1", "cycle-2", "cycle-3", "cycle-4", "cycle-5"]
        );
    }

    #[test]
    fn test_duplicates_are_kept() {
        let fixture = test_support::TestChain::new();
        let leaf = test_support::to_cert(&fixture.leaf);

        let chain = ChainBuilder::new().build(vec![leaf.clone(), leaf]);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_empty_input_yields_empty_chain() {
        assert!(ChainBuilder::new().build(Vec::new()).is_empty());
    }
}
