//! Source -> transformer chain -> feature records.

use crate::error::Result;
use crate::record::FeatureRecord;
use crate::source::DomainSource;
use crate::transform::TransformerChain;
use futures::TryStreamExt;
use std::time::Instant;
use tracing::info;

/// Read every record of `source` and run it through `chain`, keeping source
/// order. The chain is validated before this is called, so a bad chain never
/// reaches the source.
pub async fn run_pipeline(
    source: &dyn DomainSource,
    chain: &TransformerChain,
) -> Result<Vec<FeatureRecord>> {
    let started = Instant::now();
    let info = source.source_info();
    info!(
        source_type = %info.source_type,
        location = %info.location,
        transformers = ?chain.names(),
        "Starting feature extraction"
    );

    let records: Vec<FeatureRecord> = source
        .records()
        .await?
        .map_ok(|record| chain.apply(&record))
        .try_collect()
        .await?;

    info!(
        location = %info.location,
        records = records.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Feature extraction complete"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FeatureValue;
    use crate::source::MemorySource;
    use crate::transform::{TransformContext, TransformerRegistry};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pipeline_keeps_source_order() {
        let source = MemorySource::from_domains(["b.com", "a.com", "c.com"], Some("benign"));
        let chain = TransformerRegistry::builtin()
            .build_chain(Some("length"), Arc::new(TransformContext::new()))
            .unwrap();
        let records = run_pipeline(&source, &chain).await.unwrap();
        let domains: Vec<&str> = records.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["b.com", "a.com", "c.com"]);
        assert_eq!(records[0].get("length"), Some(&FeatureValue::Int(5)));
    }

    #[tokio::test]
    async fn test_empty_source_gives_no_records() {
        let source = MemorySource::default();
        let chain = TransformerRegistry::builtin()
            .build_chain(None, Arc::new(TransformContext::new()))
            .unwrap();
        assert!(run_pipeline(&source, &chain).await.unwrap().is_empty());
    }
}
