//! Page-content features from the gzip-compressed HTML a domain served.
//!
//! Three groups: tag and attribute counts over the parsed document, text
//! statistics over the raw markup, and call counts over inline scripts.
//! A record without a page, or whose page does not gunzip to UTF-8, gets -1
//! in every column.

use super::{TransformContext, Transformer};
use crate::record::{DomainRecord, FeatureRecord, FeatureValue};
use flate2::read::GzDecoder;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use tracing::debug;

/// Pages larger than this after decompression are treated as absent.
const MAX_PAGE_BYTES: u64 = 32 * 1024 * 1024;

const TAG_FEATURES: usize = 53;
const TEXT_FEATURES: usize = 6;

/// Keys in output order: tag counts, text statistics, inline-script calls.
const HTML_KEYS: [&str; 87] = [
    "html_num_of_tags",
    "html_num_of_paragraphs",
    "html_num_of_divs",
    "html_num_of_titles",
    "html_num_of_external_js",
    "html_num_of_links",
    "html_num_of_scripts",
    "html_num_of_scripts_async",
    "html_num_of_scripts_type",
    "html_num_of_anchors",
    "html_num_of_anchors_to_hash",
    "html_num_of_anchors_to_https",
    "html_num_of_anchors_to_com",
    "html_num_of_inputs",
    "html_num_of_input_password",
    "html_num_of_hidden_elements",
    "html_num_of_input_hidden",
    "html_num_of_objects",
    "html_num_of_embeds",
    "html_num_of_frame",
    "html_num_of_iframe",
    "html_num_of_iframe_src",
    "html_num_of_iframe_src_https",
    "html_num_of_center",
    "html_num_of_imgs",
    "html_num_of_imgs_src",
    "html_num_of_meta",
    "html_num_of_links_href",
    "html_num_of_links_href_https",
    "html_num_of_links_href_css",
    "html_num_of_links_type",
    "html_num_of_link_type_app",
    "html_num_of_link_rel",
    "html_num_of_all_hrefs",
    "html_num_of_form_action",
    "html_num_of_form_http",
    "html_num_of_strong",
    "html_no_hrefs",
    "html_internal_href_ratio",
    "html_num_of_internal_hrefs",
    "html_external_href_ratio",
    "html_num_of_external_href",
    "html_num_of_icon",
    "html_icon_external",
    "html_num_of_form_php",
    "html_num_of_form_hash",
    "html_num_of_form_js",
    "html_malicious_form",
    "html_most_common",
    "html_num_of_css_internal",
    "html_num_of_css_external",
    "html_num_of_anchors_to_content",
    "html_num_of_anchors_to_void",
    "html_num_of_words",
    "html_num_of_lines",
    "html_unique_words",
    "html_average_word_len",
    "html_blocked_keywords_label",
    "html_num_of_blank_spaces",
    "html_create_element",
    "html_write",
    "html_char_code_at",
    "html_concat",
    "html_escape",
    "html_eval",
    "html_exec",
    "html_from_char_code",
    "html_link",
    "html_parse_int",
    "html_replace",
    "html_search",
    "html_substring",
    "html_unescape",
    "html_add_event_listener",
    "html_set_interval",
    "html_set_timeout",
    "html_push",
    "html_index_of",
    "html_document_write",
    "html_get",
    "html_find",
    "html_document_create_element",
    "html_window_set_timeout",
    "html_window_set_interval",
    "html_hex_encoding",
    "html_unicode_encoding",
    "html_long_variable_name",
];

/// Columns holding fractions; their sentinel is written as a float.
const FLOAT_KEYS: [&str; 2] = ["html_most_common", "html_average_word_len"];

/// Inline-script patterns, in key order. The flag marks patterns that must
/// not be preceded by `n` (so `escape(` does not also count `unescape(`).
const SCRIPT_PATTERNS: [(&str, bool); 28] = [
    (r"createElement\(", false),
    (r"write\(", false),
    (r"charCodeAt\(", false),
    (r"concat\(", false),
    (r"escape\(", true),
    (r"eval\(", false),
    (r"exec\(", false),
    (r"fromCharCode\(", false),
    (r"link\(", false),
    (r"parseInt\(", false),
    (r"replace\(", false),
    (r"search\(", false),
    (r"substring\(", false),
    (r"unescape\(", false),
    (r"addEventListener\(", false),
    (r"setInterval\(", false),
    (r"setTimeout\(", false),
    (r"push\(", false),
    (r"indexOf\(", false),
    (r"document\.write\(", false),
    (r"get\(", false),
    (r"find\(", false),
    (r"document\.createElement\(", false),
    (r"window\.setTimeout\(", false),
    (r"window\.setInterval\(", false),
    (r"\\x[0-9A-Fa-f]{2}", false),
    (r"\\u[0-9A-Fa-f]{4}", false),
    (r"\b[a-zA-Z0-9_]{20,}\b", false),
];

const HIDDEN_STYLES: [&str; 4] = [
    "display: none",
    "visibility: hidden",
    "opacity: 0",
    "position: absolute",
];

/// Features of the stored page. Not part of the `lexical` alias; select it by
/// name.
#[derive(Debug, Clone)]
pub struct HtmlTransformer {
    scripts: Vec<(Option<Regex>, bool)>,
    blocked_keywords: Option<Regex>,
    blank_runs: Option<Regex>,
}

impl Default for HtmlTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlTransformer {
    pub fn new() -> Self {
        let scripts = SCRIPT_PATTERNS
            .iter()
            .map(|(pattern, no_n_before)| (Regex::new(pattern).ok(), *no_n_before))
            .collect();
        Self {
            scripts,
            blocked_keywords: Regex::new(
                r"(?i)\b(suspended|blocked|forbidden|denied|restricted)\b",
            )
            .ok(),
            blank_runs: Regex::new(r"\s{2,}").ok(),
        }
    }

    fn text_features(&self, html: &str) -> Vec<FeatureValue> {
        let words: Vec<&str> = html.split_whitespace().collect();
        let unique: HashSet<&str> = words.iter().copied().collect();
        let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
        let average = if words.is_empty() {
            0.0
        } else {
            total_len as f64 / words.len() as f64
        };
        let blocked = self
            .blocked_keywords
            .as_ref()
            .is_some_and(|re| re.is_match(html));
        let blanks = self
            .blank_runs
            .as_ref()
            .map_or(0, |re| re.find_iter(html).count());

        vec![
            words.len().into(),
            html.lines().count().into(),
            unique.len().into(),
            average.into(),
            i64::from(blocked).into(),
            blanks.into(),
        ]
    }

    fn script_features(&self, scripts: &[String]) -> Vec<FeatureValue> {
        self.scripts
            .iter()
            .map(|(pattern, no_n_before)| {
                let Some(re) = pattern else {
                    return FeatureValue::Int(0);
                };
                let count: usize = scripts
                    .iter()
                    .map(|script| {
                        re.find_iter(script)
                            .filter(|m| {
                                !no_n_before || !script[..m.start()].ends_with('n')
                            })
                            .count()
                    })
                    .sum();
                count.into()
            })
            .collect()
    }
}

/// Gunzip and decode a stored page; `None` when it is not gzip, not UTF-8
/// or too large.
pub fn decompress_html(compressed: &[u8]) -> Option<String> {
    let mut bytes = Vec::new();
    let read = GzDecoder::new(compressed)
        .take(MAX_PAGE_BYTES + 1)
        .read_to_end(&mut bytes);
    match read {
        Ok(n) if n as u64 > MAX_PAGE_BYTES => {
            debug!(bytes = n, "Page exceeds the size limit");
            None
        }
        Ok(_) => String::from_utf8(bytes)
            .inspect_err(|e| debug!(error = %e, "Page is not UTF-8"))
            .ok(),
        Err(e) => {
            debug!(error = %e, "Page does not decompress");
            None
        }
    }
}

fn attr<'a>(el: &ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name)
}

fn attr_contains(el: &ElementRef<'_>, name: &str, needle: &str) -> bool {
    attr(el, name).is_some_and(|v| v.contains(needle))
}

/// Case-insensitive attribute equality; `rel` compares its token list.
fn attr_is(el: &ElementRef<'_>, name: &str, value: &str) -> bool {
    attr(el, name).is_some_and(|v| {
        let v = v.split_whitespace().collect::<Vec<_>>().join(" ");
        v.eq_ignore_ascii_case(value)
    })
}

fn is_hidden_style(el: &ElementRef<'_>) -> bool {
    attr(el, "style").is_some_and(|style| HIDDEN_STYLES.iter().any(|s| style.contains(s)))
}

/// Elements of a document, grouped by tag name.
struct Elements<'a> {
    all: Vec<ElementRef<'a>>,
    by_name: HashMap<&'a str, Vec<ElementRef<'a>>>,
}

impl<'a> Elements<'a> {
    fn of(document: &'a Html) -> Self {
        let all: Vec<ElementRef<'a>> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();
        let mut by_name: HashMap<&'a str, Vec<ElementRef<'a>>> = HashMap::new();
        for el in &all {
            by_name.entry(el.value().name()).or_default().push(*el);
        }
        Self { all, by_name }
    }

    fn named(&self, name: &str) -> &[ElementRef<'a>] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn count(&self, name: &str, pred: impl Fn(&ElementRef<'a>) -> bool) -> usize {
        self.named(name).iter().filter(|el| pred(el)).count()
    }

    fn with_attr(&self, name: &str, attr_name: &str) -> usize {
        self.count(name, |el| attr(el, attr_name).is_some())
    }
}

fn tag_features(document: &Html) -> (Vec<FeatureValue>, Vec<String>) {
    let elements = Elements::of(document);

    let anchors = elements.named("a");
    let hrefs: Vec<&str> = anchors
        .iter()
        .filter_map(|a| attr(a, "href"))
        .filter(|h| !h.is_empty())
        .collect();
    let external_hrefs = hrefs.iter().filter(|h| h.contains("http")).count();
    let internal_hrefs = hrefs.len() - external_hrefs;
    let (internal_flag, external_flag) = if hrefs.is_empty() {
        (false, false)
    } else {
        let total = hrefs.len() as f64;
        (
            internal_hrefs as f64 / total <= 0.5,
            external_hrefs as f64 / total > 0.5,
        )
    };
    let most_common = {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for h in &hrefs {
            *counts.entry(*h).or_default() += 1;
        }
        counts
            .values()
            .max()
            .map_or(0.0, |&max| max as f64 / hrefs.len() as f64)
    };

    let forms: Vec<&str> = elements
        .named("form")
        .iter()
        .filter_map(|f| attr(f, "action"))
        .collect();
    let form_count = |needle: &str| forms.iter().filter(|a| a.contains(needle)).count();
    let form_js = forms
        .iter()
        .filter(|a| a.contains("javascript:void()") || a.contains("javascript:void(0)"))
        .count();
    let malicious_form = forms.iter().any(|a| {
        a.contains("http") || a.contains(".php") || a.contains('#') || a.contains("javascript:void")
    });

    let hidden_elements = elements
        .all
        .iter()
        .filter(|el| attr(el, "hidden").is_some() || is_hidden_style(el))
        .count();
    let hidden_inputs =
        elements.count("input", |el| attr_is(el, "type", "hidden") || is_hidden_style(el));

    let icons: Vec<&ElementRef<'_>> = elements
        .named("link")
        .iter()
        .filter(|el| attr_is(el, "rel", "shortcut icon"))
        .collect();
    let stylesheets: Vec<&ElementRef<'_>> = elements
        .named("link")
        .iter()
        .filter(|el| attr_is(el, "rel", "stylesheet"))
        .collect();
    let external_css = stylesheets
        .iter()
        .filter(|el| attr_contains(el, "href", "http"))
        .count();

    let values: Vec<FeatureValue> = vec![
        elements.by_name.len().into(),
        elements.named("p").len().into(),
        elements.named("div").len().into(),
        elements.named("title").len().into(),
        elements.with_attr("script", "src").into(),
        elements.named("link").len().into(),
        elements.named("script").len().into(),
        elements.with_attr("script", "async").into(),
        elements.with_attr("script", "type").into(),
        anchors.len().into(),
        elements.count("a", |el| attr_is(el, "href", "#")).into(),
        elements.count("a", |el| attr_contains(el, "href", "http")).into(),
        elements.count("a", |el| attr_contains(el, "href", ".com")).into(),
        elements.named("input").len().into(),
        elements.count("input", |el| attr_is(el, "type", "password")).into(),
        hidden_elements.into(),
        hidden_inputs.into(),
        elements.named("object").len().into(),
        elements.named("embed").len().into(),
        elements.named("frame").len().into(),
        elements.named("iframe").len().into(),
        elements.with_attr("iframe", "src").into(),
        elements.count("iframe", |el| attr_contains(el, "src", "http")).into(),
        elements.named("center").len().into(),
        elements.named("img").len().into(),
        elements.with_attr("img", "src").into(),
        elements.named("meta").len().into(),
        elements.with_attr("link", "href").into(),
        elements.count("link", |el| attr_contains(el, "href", "http")).into(),
        elements.count("link", |el| attr_contains(el, "href", ".css")).into(),
        elements.with_attr("link", "type").into(),
        elements.count("link", |el| attr_is(el, "type", "application/rss+xml")).into(),
        elements.count("link", |el| attr_is(el, "rel", "shortlink")).into(),
        elements.all.iter().filter(|el| attr(el, "href").is_some()).count().into(),
        forms.len().into(),
        form_count("http").into(),
        elements.named("strong").len().into(),
        i64::from(hrefs.is_empty()).into(),
        i64::from(internal_flag).into(),
        internal_hrefs.into(),
        i64::from(external_flag).into(),
        external_hrefs.into(),
        icons.len().into(),
        i64::from(icons.iter().any(|el| attr_contains(el, "href", "http"))).into(),
        form_count(".php").into(),
        form_count("#").into(),
        form_js.into(),
        i64::from(malicious_form).into(),
        most_common.into(),
        (stylesheets.len() - external_css).into(),
        external_css.into(),
        elements.count("a", |el| attr_is(el, "href", "#content")).into(),
        elements.count("a", |el| attr_is(el, "href", "javascript:void(0)")).into(),
    ];

    let inline_scripts = elements
        .named("script")
        .iter()
        .filter(|el| attr(el, "src").is_none())
        .map(|el| el.text().collect::<String>())
        .collect();
    (values, inline_scripts)
}

fn sentinel_row() -> Vec<(&'static str, FeatureValue)> {
    HTML_KEYS
        .iter()
        .map(|&key| {
            let value = if FLOAT_KEYS.contains(&key) {
                FeatureValue::Float(-1.0)
            } else {
                FeatureValue::Int(-1)
            };
            (key, value)
        })
        .collect()
}

impl Transformer for HtmlTransformer {
    fn name(&self) -> &'static str {
        "html"
    }

    fn description(&self) -> &'static str {
        "Tag, text and inline-script counts of the stored page (-1 without one)"
    }

    fn feature_keys(&self) -> &'static [&'static str] {
        &HTML_KEYS
    }

    fn in_default_chain(&self) -> bool {
        false
    }

    fn transform(
        &self,
        record: &DomainRecord,
        _prior: &FeatureRecord,
        _context: &TransformContext,
    ) -> Vec<(&'static str, FeatureValue)> {
        let Some(html) = record.compressed_html.as_deref().and_then(decompress_html) else {
            return sentinel_row();
        };

        let document = Html::parse_document(&html);
        let (mut values, inline_scripts) = tag_features(&document);
        debug_assert_eq!(values.len(), TAG_FEATURES);
        values.extend(self.text_features(&html));
        debug_assert_eq!(values.len(), TAG_FEATURES + TEXT_FEATURES);
        values.extend(self.script_features(&inline_scripts));

        HTML_KEYS.iter().copied().zip(values).collect()
    }
}
