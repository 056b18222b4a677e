//! Built-in lexical transformers.
//!
//! All of them look only at the domain string. Counts are over characters,
//! not bytes, and ratios are relative to the full name length (dots included).

use super::{TransformContext, Transformer, normalized, ratio};
use crate::record::{DomainRecord, FeatureRecord, FeatureValue};
use std::collections::BTreeMap;

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

fn is_consonant(c: char) -> bool {
    c.is_ascii_alphabetic() && !is_vowel(c)
}

/// Length of the longest run of consecutive chars satisfying `pred`.
fn longest_run(s: &str, pred: impl Fn(char) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for c in s.chars() {
        if pred(c) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Length of the longest run of one repeated char.
fn longest_repeat(s: &str) -> usize {
    let mut best = 0;
    let mut current = 0;
    let mut previous = None;
    for c in s.chars() {
        current = if previous == Some(c) { current + 1 } else { 1 };
        previous = Some(c);
        best = best.max(current);
    }
    best
}

/// Non-empty dot-separated labels.
pub(crate) fn labels(domain: &str) -> Vec<&str> {
    normalized(domain).split('.').filter(|l| !l.is_empty()).collect()
}

/// Second-level label: the one before the TLD, or the only label.
pub(crate) fn second_level(domain: &str) -> &str {
    let labels = labels(domain);
    match labels.len() {
        0 => "",
        1 => labels[0],
        n => labels[n - 2],
    }
}

/// Shannon entropy in bits of the character distribution.
pub fn shannon_entropy(s: &str) -> f64 {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            p * (1.0 / p).log2()
        })
        .sum()
}

/// Name length in characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Length;

impl Transformer for Length {
    fn name(&self) -> &'static str {
        "length"
    }

    fn description(&self) -> &'static str {
        "Domain length in characters"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &["length"]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        vec![("length", normalized(&record.domain).chars().count().into())]
    }
}

/// Share of digit characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitRatio;

impl Transformer for DigitRatio {
    fn name(&self) -> &'static str {
        "digit_ratio"
    }

    fn description(&self) -> &'static str {
        "Digits divided by length"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &["digit_ratio"]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let name = normalized(&record.domain);
        let digits = name.chars().filter(char::is_ascii_digit).count();
        vec![("digit_ratio", ratio(digits, name.chars().count()).into())]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CharClasses;

impl Transformer for CharClasses {
    fn name(&self) -> &'static str {
        "char_classes"
    }

    fn description(&self) -> &'static str {
        "Letter, hyphen, vowel and consonant ratios; special, non-ASCII and uppercase counts"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &[
            "letter_ratio",
            "hyphen_ratio",
            "vowel_ratio",
            "consonant_ratio",
            "special_char_count",
            "non_ascii_count",
            "uppercase_count",
        ]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let name = normalized(&record.domain);
        let len = name.chars().count();
        let count = |pred: fn(&char) -> bool| name.chars().filter(pred).count();

        let letters = count(|c| c.is_alphabetic());
        let hyphens = count(|c| *c == '-');
        let vowels = count(|c| is_vowel(*c));
        let consonants = count(|c| is_consonant(*c));
        let special = count(|c| !c.is_alphanumeric() && *c != '.' && *c != '-');
        let non_ascii = count(|c| !c.is_ascii());
        let uppercase = count(|c| c.is_uppercase());

        vec![
            ("letter_ratio", ratio(letters, len).into()),
            ("hyphen_ratio", ratio(hyphens, len).into()),
            ("vowel_ratio", ratio(vowels, len).into()),
            ("consonant_ratio", ratio(consonants, len).into()),
            ("special_char_count", special.into()),
            ("non_ascii_count", non_ascii.into()),
            ("uppercase_count", uppercase.into()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Entropy;

impl Transformer for Entropy {
    fn name(&self) -> &'static str {
        "entropy"
    }

    fn description(&self) -> &'static str {
        "Shannon entropy of the character distribution (bits)"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &["entropy"]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        vec![("entropy", shannon_entropy(normalized(&record.domain)).into())]
    }
}

/// Label layout of the name.
#[derive(Debug, Clone, Copy, Default)]
pub struct Structure;

impl Transformer for Structure {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn description(&self) -> &'static str {
        "Label counts, TLD, second-level and longest label lengths, IDN flag"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &[
            "label_count",
            "subdomain_count",
            "tld",
            "tld_length",
            "sld_length",
            "longest_label_length",
            "is_idn",
        ]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let labels = labels(&record.domain);
        let tld = if labels.len() > 1 {
            labels[labels.len() - 1].to_lowercase()
        } else {
            String::new()
        };
        let tld_length = tld.chars().count();
        let sld_length = second_level(&record.domain).chars().count();
        let longest = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let is_idn = labels.iter().any(|l| {
            l.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("xn--")) || !l.is_ascii()
        });

        vec![
            ("label_count", labels.len().into()),
            ("subdomain_count", labels.len().saturating_sub(2).into()),
            ("tld", tld.into()),
            ("tld_length", tld_length.into()),
            ("sld_length", sld_length.into()),
            ("longest_label_length", longest.into()),
            ("is_idn", is_idn.into()),
        ]
    }
}

/// Longest runs of consonants, vowels, digits and of one repeated char.
#[derive(Debug, Clone, Copy, Default)]
pub struct Runs;

impl Transformer for Runs {
    fn name(&self) -> &'static str {
        "runs"
    }

    fn description(&self) -> &'static str {
        "Longest consonant, vowel, digit and repeated-character runs"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &[
            "max_consonant_run",
            "max_vowel_run",
            "max_digit_run",
            "max_repeated_char",
        ]
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let name = normalized(&record.domain);
        vec![
            ("max_consonant_run", longest_run(name, is_consonant).into()),
            ("max_vowel_run", longest_run(name, is_vowel).into()),
            (
                "max_digit_run",
                longest_run(name, |c| c.is_ascii_digit()).into(),
            ),
            ("max_repeated_char", longest_repeat(name).into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(t: &dyn Transformer, domain: &str) -> Vec<(&'static str, FeatureValue)> {
        t.transform(
            &DomainRecord::new(domain),
            &FeatureRecord::for_domain(&DomainRecord::new(domain)),
            &TransformContext::new(),
        )
    }

    fn value<'a>(out: &'a [(&'static str, FeatureValue)], key: &str) -> &'a FeatureValue {
        &out.iter().find(|(k, _)| *k == key).unwrap().1
    }

    #[test]
    fn test_length_counts_chars() {
        assert_eq!(run(&Length, "abc123.com"), vec![("length", FeatureValue::Int(10))]);
        assert_eq!(run(&Length, "bücher.de"), vec![("length", FeatureValue::Int(9))]);
        assert_eq!(run(&Length, "example.com."), vec![("length", FeatureValue::Int(11))]);
        assert_eq!(run(&Length, ""), vec![("length", FeatureValue::Int(0))]);
    }

    #[test]
    fn test_digit_ratio() {
        let out = run(&DigitRatio, "xn--fsqu00a.com");
        assert_eq!(out, vec![("digit_ratio", FeatureValue::Float(2.0 / 15.0))]);
        assert_eq!(
            run(&DigitRatio, ""),
            vec![("digit_ratio", FeatureValue::Float(0.0))]
        );
    }

    #[test]
    fn test_char_classes() {
        let out = run(&CharClasses, "Ab-c_1.io");
        // 9 chars: A b - c _ 1 . i o
        assert_eq!(value(&out, "letter_ratio"), &FeatureValue::Float(5.0 / 9.0));
        assert_eq!(value(&out, "hyphen_ratio"), &FeatureValue::Float(1.0 / 9.0));
        assert_eq!(value(&out, "vowel_ratio"), &FeatureValue::Float(3.0 / 9.0));
        assert_eq!(value(&out, "consonant_ratio"), &FeatureValue::Float(2.0 / 9.0));
        assert_eq!(value(&out, "special_char_count"), &FeatureValue::Int(1));
        assert_eq!(value(&out, "non_ascii_count"), &FeatureValue::Int(0));
        assert_eq!(value(&out, "uppercase_count"), &FeatureValue::Int(1));
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("ab") - 1.0).abs() < 1e-12);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_structure() {
        let out = run(&Structure, "mail.login.Example.COM");
        assert_eq!(value(&out, "label_count"), &FeatureValue::Int(4));
        assert_eq!(value(&out, "subdomain_count"), &FeatureValue::Int(2));
        assert_eq!(value(&out, "tld"), &FeatureValue::Text("com".into()));
        assert_eq!(value(&out, "tld_length"), &FeatureValue::Int(3));
        assert_eq!(value(&out, "sld_length"), &FeatureValue::Int(7));
        assert_eq!(value(&out, "longest_label_length"), &FeatureValue::Int(7));
        assert_eq!(value(&out, "is_idn"), &FeatureValue::Bool(false));

        let out = run(&Structure, "xn--fsqu00a.com");
        assert_eq!(value(&out, "is_idn"), &FeatureValue::Bool(true));

        let out = run(&Structure, "localhost");
        assert_eq!(value(&out, "tld"), &FeatureValue::Text(String::new()));
        assert_eq!(value(&out, "sld_length"), &FeatureValue::Int(9));
        assert_eq!(value(&out, "subdomain_count"), &FeatureValue::Int(0));
    }

    #[test]
    fn test_structure_key_order_matches_declaration() {
        let out = run(&Structure, "a.b");
        let keys: Vec<&str> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, Structure.feature_keys().to_vec());
    }

    #[test]
    fn test_runs() {
        let out = run(&Runs, "strngth-aeiou-1234-zzzz.net");
        assert_eq!(value(&out, "max_consonant_run"), &FeatureValue::Int(7));
        assert_eq!(value(&out, "max_vowel_run"), &FeatureValue::Int(5));
        assert_eq!(value(&out, "max_digit_run"), &FeatureValue::Int(4));
        assert_eq!(value(&out, "max_repeated_char"), &FeatureValue::Int(4));

        let out = run(&Runs, "");
        assert!(out.iter().all(|(_, v)| *v == FeatureValue::Int(0)));
    }

    #[test]
    fn test_second_level() {
        assert_eq!(second_level("www.google.co"), "google");
        assert_eq!(second_level("single"), "single");
        assert_eq!(second_level("..."), "");
    }
}
