//! Character n-gram frequency tables.
//!
//! A table is a count per n-gram plus the total number of n-grams counted.
//! Counting is a plain sum, so tables built over disjoint parts of a dataset
//! merge into exactly the table of the whole dataset.

use crate::error::{DomfeatError, Result};
use crate::persistence::{atomic_write_json, atomic_write_with};
use crate::source::{TextFileSource, read_domain_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// N-gram counts over a set of domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramTable {
    n: usize,
    strip_tld: bool,
    total: u64,
    counts: BTreeMap<String, u64>,
}

impl NgramTable {
    pub fn new(n: usize, strip_tld: bool) -> Result<Self> {
        if n == 0 {
            return Err(DomfeatError::config("n-gram size must be at least 1"));
        }
        Ok(Self {
            n,
            strip_tld,
            total: 0,
            counts: BTreeMap::new(),
        })
    }

    /// Count every domain of `domains` into a fresh table.
    pub fn count_domains<I, S>(n: usize, strip_tld: bool, domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new(n, strip_tld)?;
        for domain in domains {
            table.add_domain(domain.as_ref());
        }
        Ok(table)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn strip_tld(&self) -> bool {
        self.strip_tld
    }

    /// Total n-grams counted, duplicates included.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Distinct n-grams.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn add_domain(&mut self, domain: &str) {
        for gram in ngrams(domain, self.n, self.strip_tld) {
            *self.counts.entry(gram).or_insert(0) += 1;
            self.total += 1;
        }
    }

    /// Add the counts of `other`. Both tables must use the same settings.
    pub fn merge(&mut self, other: &NgramTable) -> Result<()> {
        if other.n != self.n || other.strip_tld != self.strip_tld {
            return Err(DomfeatError::config(format!(
                "cannot merge n-gram tables with different settings (n={}, strip_tld={} vs n={}, strip_tld={})",
                self.n, self.strip_tld, other.n, other.strip_tld
            )));
        }
        for (gram, count) in &other.counts {
            *self.counts.entry(gram.clone()).or_insert(0) += count;
        }
        self.total += other.total;
        Ok(())
    }

    pub fn count(&self, gram: &str) -> u64 {
        self.counts.get(gram).copied().unwrap_or(0)
    }

    /// Count normalized by the total; 0 for an empty table.
    pub fn frequency(&self, gram: &str) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(gram) as f64 / self.total as f64
    }

    /// The n-grams of `domain` under this table's settings.
    pub fn grams_of(&self, domain: &str) -> Vec<String> {
        ngrams(domain, self.n, self.strip_tld)
    }

    /// The `k` most frequent n-grams, ties broken alphabetically.
    pub fn top(&self, k: usize) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> =
            self.counts.iter().map(|(g, c)| (g.as_str(), *c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.truncate(k);
        entries
    }

    /// Write the table. `.csv` paths get `ngram,count,frequency` rows, anything
    /// else the JSON form that [`NgramTable::load`] reads back.
    pub fn save(&self, path: &Path) -> Result<()> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            atomic_write_with(path, |out| {
                let mut writer = csv::Writer::from_writer(out);
                writer.write_record(["ngram", "count", "frequency"])?;
                for (gram, count) in &self.counts {
                    let count = count.to_string();
                    let frequency = self.frequency(gram).to_string();
                    writer.write_record([gram.as_str(), count.as_str(), frequency.as_str()])?;
                }
                writer.flush()?;
                Ok(())
            })?;
        } else {
            atomic_write_json(path, self)?;
        }
        info!(path = %path.display(), n = self.n, distinct = self.len(), total = self.total, "Saved n-gram table");
        Ok(())
    }

    /// Load a JSON table written by [`NgramTable::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
        let table: NgramTable = serde_json::from_str(&content)?;
        if table.n == 0 {
            return Err(DomfeatError::config(format!(
                "{}: n-gram size must be at least 1",
                path.display()
            )));
        }
        debug!(path = %path.display(), n = table.n, distinct = table.len(), "Loaded n-gram table");
        Ok(table)
    }
}

/// Count the domains of several text inputs (files or directories).
///
/// Each file is counted on its own and the per-file tables merged.
pub async fn count_files(paths: &[PathBuf], n: usize, strip_tld: bool) -> Result<NgramTable> {
    let files = TextFileSource::new(paths.to_vec(), None).resolve_files().await?;
    let mut table = NgramTable::new(n, strip_tld)?;
    for file in &files {
        let domains = read_domain_file(file).await?;
        let part = NgramTable::count_domains(n, strip_tld, &domains)?;
        debug!(file = %file.display(), domains = domains.len(), grams = part.total(), "Counted file");
        table.merge(&part)?;
    }
    Ok(table)
}

/// Labels of a domain that take part in counting: lowercased, trailing dot
/// removed and, with `strip_tld`, the last label dropped from multi-label names.
pub fn counting_labels(domain: &str, strip_tld: bool) -> Vec<String> {
    let name = domain.trim().trim_end_matches('.').to_lowercase();
    let mut labels: Vec<String> = name
        .split('.')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if strip_tld && labels.len() > 1 {
        labels.pop();
    }
    labels
}

/// Character n-grams of `domain`. N-grams never span a dot.
pub fn ngrams(domain: &str, n: usize, strip_tld: bool) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let mut grams = Vec::new();
    for label in counting_labels(domain, strip_tld) {
        let chars: Vec<char> = label.chars().collect();
        if chars.len() < n {
            continue;
        }
        grams.extend(chars.windows(n).map(|w| w.iter().collect::<String>()));
    }
    grams
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_zero_n_is_rejected() {
        assert!(matches!(NgramTable::new(0, true), Err(DomfeatError::Config(_))));
    }

    #[test]
    fn test_ngrams_strip_tld_and_case() {
        assert_eq!(ngrams("Google.COM", 3, true), vec!["goo", "oog", "ogl", "gle"]);
        assert_eq!(ngrams("ab.com", 3, false), vec!["com"]);
        assert_eq!(ngrams("mail.ab.de.", 2, true), vec!["ma", "ai", "il", "ab"]);
    }

    #[test]
    fn test_short_domains_contribute_nothing() {
        let table = NgramTable::count_domains(4, true, ["ab.com", "", "."]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.total(), 0);
        assert_eq!(table.frequency("abcd"), 0.0);
    }

    #[test]
    fn test_single_label_keeps_tld_strip_off() {
        // Nothing to strip from a bare label.
        assert_eq!(ngrams("localhost", 8, true), vec!["localhos", "ocalhost"]);
    }

    #[test]
    fn test_counts_and_frequency() {
        let table = NgramTable::count_domains(2, true, ["aaa.com", "ab.net"]).unwrap();
        assert_eq!(table.count("aa"), 2);
        assert_eq!(table.count("ab"), 1);
        assert_eq!(table.total(), 3);
        assert!((table.frequency("aa") - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(table.top(1), vec![("aa", 2)]);
    }

    #[test]
    fn test_merge_equals_whole() {
        let domains = ["alpha.com", "beta.org", "gamma.net", "alphabet.io"];
        let whole = NgramTable::count_domains(3, true, domains).unwrap();
        let mut left = NgramTable::count_domains(3, true, &domains[..2]).unwrap();
        let right = NgramTable::count_domains(3, true, &domains[2..]).unwrap();
        left.merge(&right).unwrap();
        assert_eq!(left, whole);
    }

    #[test]
    fn test_merge_rejects_different_n() {
        let mut a = NgramTable::new(2, true).unwrap();
        let b = NgramTable::new(3, true).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        let table = NgramTable::count_domains(3, true, ["example.com", "sample.org"]).unwrap();
        table.save(&path).unwrap();

        let loaded = NgramTable::load(&path).unwrap();
        assert_eq!(loaded, table);

        // Keys are written in sorted order.
        let text = std::fs::read_to_string(&path).unwrap();
        let amp = text.find("\"amp\"").unwrap();
        let xam = text.find("\"xam\"").unwrap();
        assert!(amp < xam);
    }

    #[test]
    fn test_save_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.csv");
        NgramTable::count_domains(2, true, ["abab.com"]).unwrap().save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ngram,count,frequency");
        assert_eq!(lines[1], "ab,2,0.6666666666666666");
        assert_eq!(lines[2], "ba,1,0.3333333333333333");
    }

    #[tokio::test]
    async fn test_count_files_merges_inputs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha.com\nbeta.org\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "# header\ngamma.net\n").unwrap();

        let table = count_files(&[dir.path().to_path_buf()], 3, true).await.unwrap();
        let expected =
            NgramTable::count_domains(3, true, ["alpha.com", "beta.org", "gamma.net"]).unwrap();
        assert_eq!(table, expected);
    }
}
