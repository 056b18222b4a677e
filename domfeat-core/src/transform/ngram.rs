//! Scores a domain against the precomputed n-gram table of the context.

use super::{TransformContext, Transformer, ratio};
use crate::record::{DomainRecord, FeatureRecord, FeatureValue};

#[derive(Debug, Clone, Copy, Default)]
pub struct NgramScore;

impl Transformer for NgramScore {
    fn name(&self) -> &'static str {
        "ngram"
    }

    fn description(&self) -> &'static str {
        "Mean log frequency, unseen ratio and max frequency of the domain's n-grams"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &["ngram_mean_log_freq", "ngram_unseen_ratio", "ngram_max_freq"]
    }

    fn requires_ngram_table(&self) -> bool {
        true
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let Some(table) = context.ngram_table() else {
            return self
                .feature_keys()
                .iter()
                .map(|&key| (key, FeatureValue::Float(0.0)))
                .collect();
        };

        let grams = table.grams_of(&record.domain);
        // Add-one smoothing keeps the log finite for unseen n-grams.
        let denominator = (table.total() + 1) as f64;
        let mut log_sum = 0.0_f64;
        let mut unseen = 0;
        let mut max_freq: f64 = 0.0;
        for gram in &grams {
            let count = table.count(gram);
            if count == 0 {
                unseen += 1;
            }
            log_sum += ((count + 1) as f64 / denominator).log10();
            max_freq = max_freq.max(table.frequency(gram));
        }
        let mean_log = if grams.is_empty() {
            0.0
        } else {
            log_sum / grams.len() as f64
        };

        vec![
            ("ngram_mean_log_freq", mean_log.into()),
            ("ngram_unseen_ratio", ratio(unseen, grams.len()).into()),
            ("ngram_max_freq", max_freq.into()),
        ]
    }
}
