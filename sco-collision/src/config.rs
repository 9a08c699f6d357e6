//! Margin and coefficient configuration for collision terms.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{make_link_pair, ContactRequest, LinkPair};

static CONFIG_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-pair collision coefficients (weights) with a default.
///
/// Pairs with a zero coefficient are excluded from collision checking
/// entirely; they are tracked separately so evaluators can filter them
/// without a lookup per contact.
#[derive(Debug, Clone)]
pub struct CollisionCoeffData {
    default_coeff: f64,
    lookup: HashMap<LinkPair, f64>,
    zero_coeff_pairs: BTreeSet<LinkPair>,
}

impl Default for CollisionCoeffData {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl CollisionCoeffData {
    pub fn new(default_coeff: f64) -> Self {
        Self {
            default_coeff,
            lookup: HashMap::new(),
            zero_coeff_pairs: BTreeSet::new(),
        }
    }

    /// Set the coefficient for a pair; order of the names does not matter.
    pub fn set_pair_coeff(&mut self, link_a: &str, link_b: &str, coeff: f64) {
        let key = make_link_pair(link_a, link_b);
        if coeff == 0.0 {
            self.zero_coeff_pairs.insert(key.clone());
        } else {
            self.zero_coeff_pairs.remove(&key);
        }
        self.lookup.insert(key, coeff);
    }

    pub fn pair_coeff(&self, link_a: &str, link_b: &str) -> f64 {
        let key = make_link_pair(link_a, link_b);
        *self.lookup.get(&key).unwrap_or(&self.default_coeff)
    }

    pub fn pairs_with_zero_coeff(&self) -> &BTreeSet<LinkPair> {
        &self.zero_coeff_pairs
    }
}

/// Per-pair contact margins with a default; tracks the maximum margin so
/// managers can be configured with a single widened query distance.
#[derive(Debug, Clone)]
pub struct CollisionMarginData {
    default_margin: f64,
    lookup: HashMap<LinkPair, f64>,
    max_margin: f64,
}

impl Default for CollisionMarginData {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl CollisionMarginData {
    pub fn new(default_margin: f64) -> Self {
        Self {
            default_margin,
            lookup: HashMap::new(),
            max_margin: default_margin,
        }
    }

    pub fn set_pair_margin(&mut self, link_a: &str, link_b: &str, margin: f64) {
        self.lookup.insert(make_link_pair(link_a, link_b), margin);
        self.max_margin = self.max_margin.max(margin);
    }

    pub fn pair_margin(&self, link_a: &str, link_b: &str) -> f64 {
        let key = make_link_pair(link_a, link_b);
        *self.lookup.get(&key).unwrap_or(&self.default_margin)
    }

    pub fn max_margin(&self) -> f64 {
        self.max_margin
    }

    pub fn default_margin(&self) -> f64 {
        self.default_margin
    }
}

/// Configuration shared by the collision evaluators.
#[derive(Debug, Clone)]
pub struct CollisionConfig {
    pub margin_data: CollisionMarginData,
    pub coeff_data: CollisionCoeffData,
    /// Widens contact queries without affecting the error itself.
    pub margin_buffer: f64,
    /// Longest joint-space displacement between collision samples.
    pub longest_valid_segment_length: f64,
    /// Fixed arity of collision constraint blocks.
    pub max_num_cnt: usize,
    pub contact_request: ContactRequest,
    /// Distinguishes configurations in the collision cache key.
    fingerprint: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self::new(0.025, 20.0)
    }
}

impl CollisionConfig {
    pub fn new(margin: f64, coeff: f64) -> Self {
        Self {
            margin_data: CollisionMarginData::new(margin),
            coeff_data: CollisionCoeffData::new(coeff),
            margin_buffer: 0.01,
            longest_valid_segment_length: 0.05,
            max_num_cnt: 3,
            contact_request: ContactRequest::default(),
            fingerprint: CONFIG_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coeff_defaults_and_zero_pairs() {
        let mut data = CollisionCoeffData::new(5.0);
        assert_eq!(data.pair_coeff("a", "b"), 5.0);
        data.set_pair_coeff("b", "a", 2.0);
        assert_eq!(data.pair_coeff("a", "b"), 2.0);
        data.set_pair_coeff("a", "c", 0.0);
        assert!(data.pairs_with_zero_coeff().contains(&make_link_pair("c", "a")));
        data.set_pair_coeff("a", "c", 3.0);
        assert!(data.pairs_with_zero_coeff().is_empty());
    }

    #[test]
    fn test_margin_max_tracking() {
        let mut data = CollisionMarginData::new(0.02);
        assert_eq!(data.max_margin(), 0.02);
        data.set_pair_margin("a", "b", 0.07);
        assert_eq!(data.max_margin(), 0.07);
        assert_eq!(data.pair_margin("x", "y"), 0.02);
    }

    #[test]
    fn test_config_fingerprints_are_unique() {
        let a = CollisionConfig::new(0.02, 10.0);
        let b = CollisionConfig::new(0.02, 10.0);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
