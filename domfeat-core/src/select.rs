//! Random collection sampling: copy `n` random documents from one collection
//! into another, optionally skipping known domains and unreachable ones.

use crate::config::MongoConfig;
use crate::error::Result;
use crate::liveness::LivenessChecker;
use crate::mongo;
use mongodb::bson::Document;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What to sample.
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub source: String,
    pub target: String,
    pub n: usize,
    /// Collection whose domains must not be selected.
    pub exclude: Option<String>,
    /// Shuffle seed; random when absent.
    pub seed: Option<u64>,
}

/// Counts reported after a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionReport {
    pub candidates: usize,
    pub selected: usize,
    /// Domains in the exclude collection.
    pub excluded: usize,
    /// Candidates checked and found not live before `n` were selected.
    pub non_live: usize,
    pub inserted: usize,
}

/// Shuffle `candidates` and take the first `n`, skipping non-live ones when a
/// checker is given. Checks run a batch at a time, in shuffled order, and stop
/// once `n` live candidates are found.
pub async fn select_candidates<T, F>(
    mut candidates: Vec<T>,
    n: usize,
    domain_of: F,
    checker: Option<&LivenessChecker>,
    rng: &mut StdRng,
) -> (Vec<T>, SelectionReport)
where
    F: Fn(&T) -> &str,
{
    let mut report = SelectionReport {
        candidates: candidates.len(),
        ..SelectionReport::default()
    };
    if candidates.len() < n {
        warn!(needed = n, found = candidates.len(), "Not enough candidates available");
    }
    candidates.shuffle(rng);

    let Some(checker) = checker else {
        candidates.truncate(n);
        report.selected = candidates.len();
        return (candidates, report);
    };

    let mut selected = Vec::with_capacity(n.min(candidates.len()));
    let mut pending = candidates.into_iter().peekable();
    while selected.len() < n && pending.peek().is_some() {
        let batch: Vec<T> = pending.by_ref().take(checker.concurrency()).collect();
        let domains: Vec<String> = batch.iter().map(|c| domain_of(c).to_string()).collect();
        let results = checker.check_all(&domains).await;
        for (candidate, result) in batch.into_iter().zip(results) {
            if selected.len() >= n {
                break;
            }
            if result.live {
                selected.push(candidate);
            } else {
                report.non_live += 1;
            }
        }
        debug!(
            selected = selected.len(),
            non_live = report.non_live,
            "Processed candidate batch"
        );
    }

    report.selected = selected.len();
    (selected, report)
}

/// Sample documents of `request.source` into `request.target`.
pub async fn select_into_collection(
    config: &MongoConfig,
    request: &SelectRequest,
    checker: Option<&LivenessChecker>,
) -> Result<SelectionReport> {
    let client = mongo::connect(config).await?;

    let exclude: HashSet<String> = match &request.exclude {
        Some(name) => {
            let names = mongo::fetch_domain_names(&client, config, name).await?;
            info!(collection = %name, count = names.len(), "Loaded exclude collection");
            names.into_iter().collect()
        }
        None => HashSet::new(),
    };

    let filter = mongo::exclusion_filter(&config.domain_field, &exclude);
    let documents: Vec<Document> =
        mongo::fetch_documents(&client, config, &request.source, filter)
            .await?
            .into_iter()
            .filter(|doc| {
                doc.get_str(&config.domain_field)
                    .is_ok_and(|d| !exclude.contains(d))
            })
            .collect();
    info!(collection = %request.source, count = documents.len(), "Found candidate documents");

    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let domain_field = config.domain_field.as_str();
    let (selected, mut report) = select_candidates(
        documents,
        request.n,
        |doc: &Document| doc.get_str(domain_field).unwrap_or_default(),
        checker,
        &mut rng,
    )
    .await;
    report.excluded = exclude.len();

    report.inserted = mongo::insert_documents(&client, config, &request.target, selected).await?;
    info!(
        source = %request.source,
        target = %request.target,
        selected = report.selected,
        excluded = report.excluded,
        non_live = report.non_live,
        "Inserted selected documents"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LivenessConfig;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn domains(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seeded_selection_is_reproducible() {
        let pool = domains(&["a.com", "b.com", "c.com", "d.com", "e.com", "f.com"]);
        let mut rng = StdRng::seed_from_u64(7);
        let (first, report) =
            select_candidates(pool.clone(), 3, |s: &String| s.as_str(), None, &mut rng).await;
        let mut rng = StdRng::seed_from_u64(7);
        let (second, _) =
            select_candidates(pool.clone(), 3, |s: &String| s.as_str(), None, &mut rng).await;

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|d| pool.contains(d)));
        assert_eq!(report.candidates, 6);
        assert_eq!(report.selected, 3);
        assert_eq!(report.non_live, 0);
    }

    #[tokio::test]
    async fn test_fewer_candidates_than_requested() {
        let mut rng = StdRng::seed_from_u64(1);
        let (selected, report) = select_candidates(
            domains(&["only.com"]),
            5,
            |s: &String| s.as_str(),
            None,
            &mut rng,
        )
        .await;
        assert_eq!(selected, domains(&["only.com"]));
        assert_eq!(report.selected, 1);
    }

    #[tokio::test]
    async fn test_liveness_skips_dead_candidates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });

        let checker = LivenessChecker::new(&LivenessConfig::default())
            .with_ports(vec![port])
            .with_timeout(Duration::from_millis(2_000))
            .with_concurrency(2);
        let pool = domains(&["127.0.0.1", "-dead", "", "127.0.0.1."]);
        let mut rng = StdRng::seed_from_u64(42);
        let (selected, report) =
            select_candidates(pool, 10, |s: &String| s.as_str(), Some(&checker), &mut rng).await;

        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|d| d.starts_with("127.0.0.1")));
        assert_eq!(report.non_live, 2);
        assert_eq!(report.selected, 2);
        accept.abort();
    }

    #[tokio::test]
    async fn test_select_without_uri_is_config_error() {
        let request = SelectRequest {
            source: "src".into(),
            target: "dst".into(),
            n: 1,
            exclude: None,
            seed: Some(1),
        };
        let err = select_into_collection(&MongoConfig::default(), &request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DomfeatError::Config(_)));
    }
}
