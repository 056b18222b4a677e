//! Dictionary-word features of the second-level label.

use super::lexical::second_level;
use super::{TransformContext, Transformer, ratio};
use crate::error::Result;
use crate::record::{DomainRecord, FeatureRecord, FeatureValue};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Common English and web words used when no word list is configured.
const BUILTIN_WORDS: &[&str] = &[
    "about", "account", "action", "active", "admin", "agent", "air", "alert", "all", "app",
    "apple", "art", "auth", "auto", "back", "bank", "base", "best", "bet", "big", "bill",
    "bit", "blog", "blue", "board", "book", "box", "buy", "cam", "car", "card", "care",
    "case", "cash", "cast", "cat", "center", "chat", "check", "city", "click", "client",
    "cloud", "club", "code", "coin", "com", "connect", "cool", "corp", "credit", "data",
    "date", "day", "deal", "delivery", "design", "dev", "digital", "direct", "dog", "down",
    "drive", "easy", "edge", "energy", "express", "fast", "file", "film", "find", "fire",
    "first", "fit", "free", "fun", "game", "gate", "gift", "global", "gold", "good", "green",
    "group", "guide", "hair", "health", "help", "home", "host", "hot", "hub", "info", "job",
    "key", "kids", "king", "lab", "land", "law", "life", "light", "line", "link", "live",
    "local", "lock", "log", "login", "love", "mail", "main", "market", "media", "mobile",
    "money", "music", "my", "net", "network", "new", "news", "now", "office", "online",
    "open", "order", "page", "pay", "payment", "phone", "photo", "place", "plan", "play",
    "plus", "point", "portal", "post", "power", "press", "price", "pro", "real", "red",
    "report", "safe", "sale", "secure", "security", "send", "server", "service", "share",
    "shop", "sign", "site", "smart", "social", "soft", "solution", "sport", "star", "store",
    "stream", "studio", "sun", "support", "system", "team", "tech", "test", "the", "time",
    "today", "top", "tour", "trade", "travel", "trust", "update", "user", "verify", "video",
    "view", "web", "win", "wire", "word", "work", "world", "zone",
];

/// A word list with a minimum word length.
#[derive(Debug, Clone)]
pub struct Dictionary {
    words: HashSet<String>,
    min_len: usize,
    max_len: usize,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::builtin(3)
    }
}

impl Dictionary {
    /// Build from words; entries are lowercased, non-alphabetic entries and
    /// words shorter than `min_len` dropped.
    pub fn from_words<I, S>(words: I, min_len: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let min_len = min_len.max(1);
        let words: HashSet<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| w.chars().count() >= min_len && w.chars().all(char::is_alphabetic))
            .collect();
        let max_len = words.iter().map(|w| w.chars().count()).max().unwrap_or(0);
        Self {
            words,
            min_len,
            max_len,
        }
    }

    pub fn builtin(min_len: usize) -> Self {
        Self::from_words(BUILTIN_WORDS, min_len)
    }

    /// Load a word list, one word per line.
    pub fn from_file(path: &Path, min_len: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
        let dictionary = Self::from_words(content.lines(), min_len);
        debug!(path = %path.display(), words = dictionary.len(), "Loaded dictionary");
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Greedy longest-match segmentation; returns the words found, left to right.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let mut found = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let longest = (start + self.min_len..=chars.len().min(start + self.max_len))
                .rev()
                .map(|end| chars[start..end].iter().collect::<String>())
                .find(|candidate| self.words.contains(candidate));
            match longest {
                Some(word) => {
                    start += word.chars().count();
                    found.push(word);
                }
                None => start += 1,
            }
        }
        found
    }
}

/// Words of the dictionary found in the second-level label.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryTransformer;

impl Transformer for DictionaryTransformer {
    fn name(&self) -> &'static str {
        "dictionary"
    }

    fn description(&self) -> &'static str {
        "Dictionary words in the second-level label"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &["dict_word_count", "longest_word_length", "longest_word_ratio"]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let sld = second_level(&record.domain).to_lowercase();
        let words = context.dictionary().segment(&sld);
        let longest = words.iter().map(|w| w.chars().count()).max().unwrap_or(0);
        vec![
            ("dict_word_count", words.len().into()),
            ("longest_word_length", longest.into()),
            ("longest_word_ratio", ratio(longest, sld.chars().count()).into()),
        ]
    }
}
