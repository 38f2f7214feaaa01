use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{ScoredItem, SourceType};
use crate::normalize;

/// Marker words sites prepend to breaking-news titles; stripped before
/// similarity comparison so "快讯：X 发布" matches "X 发布".
const TITLE_MARKERS: &[&str] = &["ai", "突发", "快讯", "重磅", "独家"];

#[derive(Debug, Serialize, Deserialize, Default)]
struct UrlCache {
    #[serde(default)]
    processed_urls: Vec<String>,
    #[serde(default)]
    last_update: Option<String>,
}

/// Two-pass deduplicator: a persistent URL-seen set across runs, then a
/// title-similarity merge within the run.
pub struct Deduplicator {
    threshold: f64,
    cache_path: Option<PathBuf>,
    processed_urls: HashSet<String>,
}

impl Deduplicator {
    pub fn new(threshold: f64, cache_path: Option<PathBuf>) -> Self {
        let mut dedup = Self {
            threshold,
            cache_path,
            processed_urls: HashSet::new(),
        };
        dedup.load_cache();
        dedup
    }

    fn load_cache(&mut self) {
        let Some(path) = &self.cache_path else { return };
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<UrlCache>(&content) {
                Ok(cache) => {
                    self.processed_urls = cache.processed_urls.into_iter().collect();
                    info!(urls = self.processed_urls.len(), "URL cache loaded");
                }
                Err(e) => warn!(error = %e, "URL cache unreadable, starting empty"),
            },
            Err(e) => warn!(error = %e, "failed to read URL cache"),
        }
    }

    fn save_cache(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut urls: Vec<&String> = self.processed_urls.iter().collect();
        urls.sort();
        let cache = serde_json::json!({
            "processed_urls": urls,
            "last_update": Utc::now().to_rfc3339(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&cache)?)?;
        Ok(())
    }

    /// Full dedup: drop URLs seen in previous runs, merge near-duplicate
    /// titles, then record the survivors' URLs.
    pub fn deduplicate(&mut self, items: Vec<ScoredItem>) -> Vec<ScoredItem> {
        let before = items.len();

        let fresh: Vec<ScoredItem> = items
            .into_iter()
            .filter(|item| !self.processed_urls.contains(&normalize::canonicalize_url(&item.raw.url)))
            .collect();

        let unique = merge_by_title(fresh, self.threshold);

        for item in &unique {
            self.processed_urls.insert(normalize::canonicalize_url(&item.raw.url));
        }
        if let Err(e) = self.save_cache() {
            warn!(error = %e, "failed to save URL cache");
        }

        info!(before, after = unique.len(), "deduplicated");
        unique
    }
}

/// Title-similarity merge. Items are visited in descending score order;
/// a later item whose normalized title is ≥ threshold similar to an
/// accepted one is dropped, unless it comes from an official source and
/// the incumbent does not, in which case it replaces the incumbent.
/// Deterministic: same input, same output.
pub fn merge_by_title(items: Vec<ScoredItem>, threshold: f64) -> Vec<ScoredItem> {
    let mut sorted = items;
    sorted.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let mut unique: Vec<ScoredItem> = Vec::new();
    let mut seen_titles: Vec<String> = Vec::new();

    for item in sorted {
        let title = normalize_title(&item.raw.title);

        let duplicate_of = seen_titles
            .iter()
            .position(|seen| normalize::lcs_ratio(&title, seen) >= threshold);

        match duplicate_of {
            Some(idx) => {
                let incumbent = &unique[idx];
                if item.raw.source_type == SourceType::Official && incumbent.raw.source_type != SourceType::Official {
                    seen_titles[idx] = title;
                    unique[idx] = item;
                }
            }
            None => {
                seen_titles.push(title);
                unique.push(item);
            }
        }
    }

    unique
}

/// Lowercase, strip punctuation, drop leading marker words.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = stripped.split_whitespace().collect();
    while let Some(first) = words.first() {
        if TITLE_MARKERS.contains(first) {
            words.remove(0);
        } else if let Some(rest) = strip_marker_prefix(first) {
            words[0] = rest;
            break;
        } else {
            break;
        }
    }
    words.join(" ")
}

/// Chinese markers are usually glued to the title without a space.
fn strip_marker_prefix(word: &str) -> Option<&str> {
    for marker in TITLE_MARKERS {
        if marker.is_ascii() {
            continue;
        }
        if let Some(rest) = word.strip_prefix(marker)
            && !rest.is_empty()
        {
            return Some(rest);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, RawItem};

    fn scored(title: &str, score: f64, source_type: SourceType) -> ScoredItem {
        let raw = RawItem {
            id: title.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{}", title.replace(' ', "-")),
            source_key: "test".to_string(),
            source_name: "Test".to_string(),
            source_type,
            language: Language::En,
            pub_time: None,
            summary: String::new(),
            content: String::new(),
        };
        ScoredItem::new(raw, score, Vec::new(), false)
    }

    #[test]
    fn official_source_replaces_incumbent() {
        let merged = merge_by_title(
            vec![
                scored("AI: OpenAI launches GPT-5", 4.0, SourceType::EnMedia),
                scored("OpenAI launches GPT-5 now", 3.5, SourceType::Official),
            ],
            0.8,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].raw.source_type, SourceType::Official);
    }

    #[test]
    fn non_official_duplicate_is_dropped() {
        let merged = merge_by_title(
            vec![
                scored("OpenAI launches GPT-5", 4.0, SourceType::Official),
                scored("AI OpenAI launches GPT-5", 3.0, SourceType::EnMedia),
            ],
            0.8,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].relevance_score, 4.0);
    }

    #[test]
    fn distinct_titles_survive() {
        let merged = merge_by_title(
            vec![
                scored("OpenAI launches GPT-5", 4.0, SourceType::EnMedia),
                scored("Nvidia reports record earnings", 3.0, SourceType::EnMedia),
            ],
            0.8,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_is_stable_under_repetition() {
        let input = vec![
            scored("OpenAI launches GPT-5", 4.0, SourceType::EnMedia),
            scored("OpenAI launches GPT-5 today", 3.5, SourceType::EnMedia),
            scored("Nvidia reports record earnings", 3.0, SourceType::EnMedia),
        ];
        let once = merge_by_title(input, 0.8);
        let titles_once: Vec<_> = once.iter().map(|i| i.raw.title.clone()).collect();
        let twice = merge_by_title(once, 0.8);
        let titles_twice: Vec<_> = twice.iter().map(|i| i.raw.title.clone()).collect();
        assert_eq!(titles_once, titles_twice);
    }

    #[test]
    fn marker_words_are_stripped() {
        assert_eq!(normalize_title("AI: OpenAI ships model"), "openai ships model");
        assert_eq!(normalize_title("快讯：OpenAI 发布模型"), "openai 发布模型");
        assert_eq!(normalize_title("重磅！大模型上线"), "大模型上线");
    }

    #[test]
    fn seen_url_is_dropped_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("news_cache.json");

        let mut first = Deduplicator::new(0.8, Some(cache.clone()));
        let out = first.deduplicate(vec![scored("OpenAI launches GPT-5", 4.0, SourceType::EnMedia)]);
        assert_eq!(out.len(), 1);

        let mut second = Deduplicator::new(0.8, Some(cache));
        let out = second.deduplicate(vec![
            scored("OpenAI launches GPT-5", 4.0, SourceType::EnMedia),
            scored("Nvidia reports record earnings", 3.0, SourceType::EnMedia),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw.title, "Nvidia reports record earnings");
    }
}
