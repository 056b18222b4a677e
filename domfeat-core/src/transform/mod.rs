//! Transformer chain: named pure functions turning a domain record into
//! feature values.
//!
//! A chain is an ordered list of transformers. Each transformer declares the
//! feature keys it produces; the chain refuses to build when two of them
//! declare the same key, so a collision is caught before any record is read.

pub mod dictionary;
pub mod html;
pub mod lexical;
pub mod ngram;
pub mod registry;

pub use dictionary::{Dictionary, DictionaryTransformer};
pub use html::HtmlTransformer;
pub use registry::{DEFAULT_CHAIN, TransformerRegistry};

use crate::error::{DomfeatError, Result};
use crate::ngram::NgramTable;
use crate::record::{DOMAIN_COLUMN, DomainRecord, FeatureRecord, FeatureValue, LABEL_COLUMN};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named, pure feature function.
///
/// Implementations must be total: any input string, including empty or
/// non-ASCII ones, yields a value for every declared key.
pub trait Transformer: Send + Sync {
    /// Unique name used in the registry and on the command line.
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn description(&self) -> &'static str;

    /// Keys this transformer writes, in output order.
    fn feature_keys(&self) -> &'static [&'static str];

    /// Whether the transformer reads the n-gram table from the context.
    fn requires_ngram_table(&self) -> bool {
        false
    }

    /// Whether the `lexical` alias includes this transformer.
    fn in_default_chain(&self) -> bool {
        true
    }

    /// Compute this transformer's features. `prior` holds what earlier
    /// transformers in the chain produced.
    fn transform(
        &self,
        record: &DomainRecord,
        prior: &FeatureRecord,
        context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)>;
}

/// Read-only data shared by every transformer of a chain.
#[derive(Debug, Default)]
pub struct TransformContext {
    ngram_table: Option<NgramTable>,
    dictionary: Dictionary,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ngram_table(mut self, table: NgramTable) -> Self {
        self.ngram_table = Some(table);
        self
    }

    pub fn with_dictionary(mut self, dictionary: Dictionary) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn ngram_table(&self) -> Option<&NgramTable> {
        self.ngram_table.as_ref()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }
}

/// An ordered, validated list of transformers.
#[derive(Clone)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn Transformer>>,
    context: Arc<TransformContext>,
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain")
            .field("transformers", &self.names())
            .finish_non_exhaustive()
    }
}

impl TransformerChain {
    /// Validate and build a chain.
    ///
    /// Fails with [`DomfeatError::DuplicateFeatureKey`] when two transformers
    /// declare the same key, and with a configuration error when a key shadows
    /// the domain or label column or a transformer needs an n-gram table the
    /// context lacks.
    pub fn new(
        transformers: Vec<Arc<dyn Transformer>>,
        context: Arc<TransformContext>,
    ) -> Result<Self> {
        let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
        for transformer in &transformers {
            if transformer.requires_ngram_table() && context.ngram_table().is_none() {
                return Err(DomfeatError::config(format!(
                    "transformer '{}' needs an n-gram table (set ngram.table or pass --ngram-table)",
                    transformer.name()
                )));
            }
            for &key in transformer.feature_keys() {
                if key == DOMAIN_COLUMN || key == LABEL_COLUMN {
                    return Err(DomfeatError::config(format!(
                        "transformer '{}' declares reserved column '{key}'",
                        transformer.name()
                    )));
                }
                if let Some(first) = owners.insert(key, transformer.name()) {
                    return Err(DomfeatError::DuplicateFeatureKey {
                        key: key.to_string(),
                        first: first.to_string(),
                        second: transformer.name().to_string(),
                    });
                }
            }
        }
        debug!(transformers = ?transformers.iter().map(|t| t.name()).collect::<Vec<_>>(), "Built transformer chain");
        Ok(Self {
            transformers,
            context,
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Every key the chain produces, in output order.
    pub fn feature_keys(&self) -> Vec<&'static str> {
        self.transformers
            .iter()
            .flat_map(|t| t.feature_keys().iter().copied())
            .collect()
    }

    pub fn context(&self) -> &Arc<TransformContext> {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Run every transformer over one record.
    ///
    /// Non-finite floats become `0.0`. A declared key the transformer did not
    /// return is filled with `Null`; an undeclared one is dropped.
    pub fn apply(&self, record: &DomainRecord) -> FeatureRecord {
        let mut features = FeatureRecord::for_domain(record);
        for transformer in &self.transformers {
            let declared = transformer.feature_keys();
            for (key, value) in transformer.transform(record, &features, &self.context) {
                if !declared.contains(&key) {
                    warn!(transformer = transformer.name(), key, "Dropping undeclared feature");
                    continue;
                }
                if !features.insert(key, value.finite_or_zero()) {
                    warn!(transformer = transformer.name(), key, "Feature key already set");
                }
            }
            for &key in declared {
                if !features.contains(key) {
                    features.insert(key, FeatureValue::Null);
                }
            }
        }
        features
    }
}

/// Domain text the lexical transformers look at: trimmed, without the
/// trailing root dot.
pub(crate) fn normalized(domain: &str) -> &str {
    domain.trim().trim_end_matches('.')
}

/// `part / whole`, or 0 when `whole` is 0.
pub(crate) fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::lexical::{DigitRatio, Length};
    use pretty_assertions::assert_eq;

    struct Fixed {
        name: &'static str,
        keys: &'static [&'static str],
        out: fn() -> Vec<(&'static str, FeatureValue)>,
    }

    impl Transformer for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }
        fn description(&self) -> &'static str {
            "test"
        }
        fn feature_keys(&self) -> &'static [&'static str] {
            self.keys
        }
        fn transform(
            &self,
            _: &DomainRecord,
            _: &FeatureRecord,
            _: &TransformContext,
        ) -> Vec<(&'static str, FeatureValue)> {
            (self.out)()
        }
    }

    fn chain(transformers: Vec<Arc<dyn Transformer>>) -> Result<TransformerChain> {
        TransformerChain::new(transformers, Arc::new(TransformContext::new()))
    }

    #[test]
    fn test_apply_length_and_digit_ratio() {
        let chain = chain(vec![Arc::new(Length), Arc::new(DigitRatio)]).unwrap();
        let out = chain.apply(&DomainRecord::new("abc123.com").with_label("dga"));
        assert_eq!(out.domain, "abc123.com");
        assert_eq!(out.label.as_deref(), Some("dga"));
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["length", "digit_ratio"]);
        assert_eq!(out.get("length"), Some(&FeatureValue::Int(10)));
        assert_eq!(out.get("digit_ratio"), Some(&FeatureValue::Float(0.3)));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let err = chain(vec![
            Arc::new(Length),
            Arc::new(Fixed {
                name: "shadow",
                keys: &["length"],
                out: Vec::new,
            }),
        ])
        .unwrap_err();
        match err {
            DomfeatError::DuplicateFeatureKey { key, first, second } => {
                assert_eq!(key, "length");
                assert_eq!(first, "length");
                assert_eq!(second, "shadow");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reserved_column_is_rejected() {
        let err = chain(vec![Arc::new(Fixed {
            name: "bad",
            keys: &["label"],
            out: Vec::new,
        })])
        .unwrap_err();
        assert!(matches!(err, DomfeatError::Config(_)));
    }

    #[test]
    fn test_missing_keys_become_null_and_nan_becomes_zero() {
        let chain = chain(vec![Arc::new(Fixed {
            name: "partial",
            keys: &["a", "b"],
            out: || vec![("a", FeatureValue::Float(f64::NAN)), ("zzz", FeatureValue::Int(1))],
        })])
        .unwrap();
        let out = chain.apply(&DomainRecord::new("x.com"));
        assert_eq!(out.get("a"), Some(&FeatureValue::Float(0.0)));
        assert_eq!(out.get("b"), Some(&FeatureValue::Null));
        assert!(!out.contains("zzz"));
    }

    #[test]
    fn test_empty_chain_yields_empty_record() {
        let chain = chain(Vec::new()).unwrap();
        assert!(chain.is_empty());
        assert!(chain.apply(&DomainRecord::new("a.com")).is_empty());
    }

    #[test]
    fn test_ratio_and_normalized() {
        assert_eq!(ratio(1, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
        assert_eq!(normalized("  example.com. "), "example.com");
    }
}
