//! Property-based tests for transformers and n-gram tables using proptest.

use proptest::prelude::*;

use domfeat_core::{
    DomainRecord, FeatureValue, NgramTable, TransformContext, TransformerRegistry,
};
use std::sync::Arc;

fn full_chain() -> domfeat_core::TransformerChain {
    let table = NgramTable::count_domains(3, true, ["example.com", "paypal.com", "x7k2.net"])
        .expect("valid n");
    TransformerRegistry::builtin()
        .build_chain(
            None,
            Arc::new(TransformContext::new().with_ngram_table(table)),
        )
        .expect("default chain builds")
}

// --- Transformer totality ---

proptest! {
    #[test]
    fn features_are_finite_for_any_string(domain in any::<String>()) {
        let chain = full_chain();
        let record = chain.apply(&DomainRecord::new(domain));
        prop_assert_eq!(record.len(), chain.feature_keys().len());
        for (key, value) in record.iter() {
            if let FeatureValue::Float(f) = value {
                prop_assert!(f.is_finite(), "{} = {}", key, f);
            }
            prop_assert!(!value.is_null(), "{} is null", key);
        }
    }

    #[test]
    fn features_are_finite_for_long_domains(
        label in "[a-z0-9-]{1,63}",
        repeat in 1usize..20,
    ) {
        let domain = format!("{}.com", vec![label; repeat].join("."));
        let chain = full_chain();
        let record = chain.apply(&DomainRecord::new(domain));
        for (_, value) in record.iter() {
            if let Some(f) = value.as_f64() {
                prop_assert!(f.is_finite());
                prop_assert!(f >= -1e6);
            }
        }
    }

    #[test]
    fn ratios_stay_in_unit_interval(domain in "\\PC{0,80}") {
        let chain = full_chain();
        let record = chain.apply(&DomainRecord::new(domain));
        for key in ["digit_ratio", "letter_ratio", "hyphen_ratio", "vowel_ratio",
                    "consonant_ratio", "longest_word_ratio", "ngram_unseen_ratio"] {
            let value = record.get(key).and_then(FeatureValue::as_f64).unwrap_or(-1.0);
            prop_assert!((0.0..=1.0).contains(&value), "{} = {}", key, value);
        }
    }

    #[test]
    fn chain_is_deterministic(domain in "\\PC{0,40}") {
        let chain = full_chain();
        let record = DomainRecord::new(domain);
        prop_assert_eq!(chain.apply(&record), chain.apply(&record));
    }
}

// --- N-gram table properties ---

proptest! {
    #[test]
    fn ngram_partition_merge_equals_whole(
        domains in prop::collection::vec("[a-z0-9.-]{0,24}", 0..40),
        split in 0usize..40,
        n in 1usize..5,
    ) {
        let split = split.min(domains.len());
        let whole = NgramTable::count_domains(n, true, &domains).unwrap();

        let mut left = NgramTable::count_domains(n, true, &domains[..split]).unwrap();
        let right = NgramTable::count_domains(n, true, &domains[split..]).unwrap();
        left.merge(&right).unwrap();
        prop_assert_eq!(&left, &whole);

        // Merging the other way round gives the same table.
        let mut right_first = right.clone();
        let left_again = NgramTable::count_domains(n, true, &domains[..split]).unwrap();
        right_first.merge(&left_again).unwrap();
        prop_assert_eq!(right_first, whole);
    }

    #[test]
    fn ngram_frequencies_sum_to_one(
        domains in prop::collection::vec("[a-z]{3,12}\\.com", 1..20),
    ) {
        let table = NgramTable::count_domains(3, true, &domains).unwrap();
        let grams: std::collections::BTreeSet<String> =
            domains.iter().flat_map(|d| table.grams_of(d)).collect();
        let sum: f64 = grams.iter().map(|g| table.frequency(g)).sum();
        prop_assert!((sum - 1.0).abs() < 1e-9);
    }
}
