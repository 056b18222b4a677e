//! Transformer registry: the fixed table of transformers selectable by name.

use super::dictionary::DictionaryTransformer;
use super::html::HtmlTransformer;
use super::lexical::{CharClasses, DigitRatio, Entropy, Length, Runs, Structure};
use super::ngram::NgramScore;
use super::{TransformContext, Transformer, TransformerChain};
use crate::error::{DomfeatError, Result};
use std::sync::Arc;
use tracing::debug;

/// Alias for every registered transformer that needs no n-gram table and
/// has not opted out of the default chain.
pub const DEFAULT_CHAIN: &str = "lexical";

/// Transformers by name, in registration order.
pub struct TransformerRegistry {
    transformers: Vec<Arc<dyn Transformer>>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    /// Registry with every built-in transformer.
    pub fn builtin() -> Self {
        let builtins: [Arc<dyn Transformer>; 9] = [
            Arc::new(Length),
            Arc::new(DigitRatio),
            Arc::new(CharClasses),
            Arc::new(Entropy),
            Arc::new(Structure),
            Arc::new(Runs),
            Arc::new(DictionaryTransformer),
            Arc::new(NgramScore),
            Arc::new(HtmlTransformer::new()),
        ];
        Self {
            transformers: builtins.into(),
        }
    }

    /// Register a transformer. Names must be unique and must not shadow the
    /// default alias.
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) -> Result<()> {
        let name = transformer.name();
        if name == DEFAULT_CHAIN || self.get(name).is_some() {
            return Err(DomfeatError::config(format!(
                "transformer '{name}' is already registered"
            )));
        }
        debug!(transformer = name, "Registering transformer");
        self.transformers.push(transformer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Transformer>> {
        self.transformers.iter()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    fn lexical(&self) -> impl Iterator<Item = Arc<dyn Transformer>> + '_ {
        self.transformers
            .iter()
            .filter(|t| t.in_default_chain() && !t.requires_ngram_table())
            .cloned()
    }

    /// Resolve a comma-separated selection into transformers.
    ///
    /// `None` selects the default chain, with `ngram` appended when
    /// `with_ngram` is set. `lexical` may also appear inside an explicit list.
    /// Unknown names are a configuration error.
    pub fn resolve(
        &self,
        selection: Option<&str>,
        with_ngram: bool,
    ) -> Result<Vec<Arc<dyn Transformer>>> {
        let Some(selection) = selection else {
            let mut chain: Vec<Arc<dyn Transformer>> = self.lexical().collect();
            if with_ngram {
                chain.extend(
                    self.transformers
                        .iter()
                        .filter(|t| t.requires_ngram_table())
                        .cloned(),
                );
            }
            return Ok(chain);
        };

        let mut chain = Vec::new();
        for name in selection.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == DEFAULT_CHAIN {
                chain.extend(self.lexical());
                continue;
            }
            let transformer = self.get(name).ok_or_else(|| {
                DomfeatError::config(format!(
                    "unknown transformer '{name}' (available: {}, {DEFAULT_CHAIN})",
                    self.names().join(", ")
                ))
            })?;
            chain.push(transformer);
        }
        if chain.is_empty() {
            return Err(DomfeatError::config("no transformers selected"));
        }
        Ok(chain)
    }

    /// Resolve a selection and validate it into a chain.
    pub fn build_chain(
        &self,
        selection: Option<&str>,
        context: Arc<TransformContext>,
    ) -> Result<TransformerChain> {
        let with_ngram = context.ngram_table().is_some();
        TransformerChain::new(self.resolve(selection, with_ngram)?, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ngram::NgramTable;
    use pretty_assertions::assert_eq;

    fn names(chain: &[Arc<dyn Transformer>]) -> Vec<&'static str> {
        chain.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn test_builtin_names() {
        let registry = TransformerRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "length",
                "digit_ratio",
                "char_classes",
                "entropy",
                "structure",
                "runs",
                "dictionary",
                "ngram",
                "html"
            ]
        );
    }

    #[test]
    fn test_default_chain_excludes_ngram_without_table() {
        let registry = TransformerRegistry::builtin();
        let chain = registry.resolve(None, false).unwrap();
        assert!(!names(&chain).contains(&"ngram"));
        assert_eq!(chain.len(), 7);

        let chain = registry.resolve(None, true).unwrap();
        assert_eq!(names(&chain).last(), Some(&"ngram"));
    }

    #[test]
    fn test_explicit_selection_keeps_order() {
        let registry = TransformerRegistry::builtin();
        let chain = registry.resolve(Some(" digit_ratio, length ,"), false).unwrap();
        assert_eq!(names(&chain), vec!["digit_ratio", "length"]);
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let registry = TransformerRegistry::builtin();
        let Err(err) = registry.resolve(Some("length,whois"), false) else {
            panic!("unknown transformer name resolved");
        };
        assert!(matches!(err, DomfeatError::Config(_)));
        assert!(err.to_string().contains("whois"));
        assert!(registry.resolve(Some(" , "), false).is_err());
    }

    #[test]
    fn test_alias_twice_is_duplicate_key() {
        let registry = TransformerRegistry::builtin();
        let err = registry
            .build_chain(Some("lexical,length"), Arc::new(TransformContext::new()))
            .unwrap_err();
        assert!(matches!(err, DomfeatError::DuplicateFeatureKey { .. }));
    }

    #[test]
    fn test_default_chain_with_table() {
        let registry = TransformerRegistry::builtin();
        let table = NgramTable::count_domains(3, true, ["example.com"]).unwrap();
        let chain = registry
            .build_chain(None, Arc::new(TransformContext::new().with_ngram_table(table)))
            .unwrap();
        assert_eq!(chain.len(), 8);
        assert_eq!(chain.feature_keys().len(), 27);
    }

    #[test]
    fn test_html_is_selected_only_by_name() {
        let registry = TransformerRegistry::builtin();
        assert!(!names(&registry.resolve(None, true).unwrap()).contains(&"html"));
        assert!(!names(&registry.resolve(Some("lexical"), false).unwrap()).contains(&"html"));

        let chain = registry
            .build_chain(Some("lexical,html"), Arc::new(TransformContext::new()))
            .unwrap();
        assert_eq!(chain.names().last(), Some(&"html"));
        assert_eq!(chain.feature_keys().len(), 24 + HtmlTransformer::new().feature_keys().len());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = TransformerRegistry::new();
        registry.register(Arc::new(Length)).unwrap();
        assert!(registry.register(Arc::new(Length)).is_err());
        assert_eq!(registry.len(), 1);
    }
}
