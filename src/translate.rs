use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, LlmGateway};
use crate::normalize;

/// Cached translations beyond this are evicted, oldest first.
const CACHE_CAPACITY: usize = 5000;
/// Titles longer than this are clipped before translation.
const MAX_TITLE_CHARS: usize = 150;
/// Translated titles are clipped to this.
const MAX_TRANSLATED_CHARS: usize = 80;
const FREE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// source text → Chinese translation, persisted as a flat JSON map.
pub struct TranslationCache {
    path: Option<PathBuf>,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl TranslationCache {
    pub fn load(path: Option<PathBuf>) -> Self {
        let mut cache = Self {
            path,
            entries: HashMap::new(),
            order: VecDeque::new(),
        };
        if let Some(p) = &cache.path
            && p.exists()
        {
            match std::fs::read_to_string(p).map_err(anyhow::Error::from).and_then(|content| {
                serde_json::from_str::<HashMap<String, String>>(&content).map_err(anyhow::Error::from)
            }) {
                Ok(map) => {
                    for (k, v) in map {
                        cache.order.push_back(k.clone());
                        cache.entries.insert(k, v);
                    }
                    info!(entries = cache.entries.len(), "translation cache loaded");
                }
                Err(e) => warn!(error = %e, "translation cache unreadable, starting empty"),
            }
        }
        cache
    }

    pub fn get(&self, text: &str) -> Option<&String> {
        self.entries.get(text)
    }

    pub fn insert(&mut self, text: String, translated: String) {
        if self.entries.insert(text.clone(), translated).is_none() {
            self.order.push_back(text);
        }
        while self.entries.len() > CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

/// English→Chinese title translation: a free public endpoint first, the
/// LLM as fallback, both behind the persistent cache.
pub struct Translator<'a> {
    gateway: &'a LlmGateway,
    client: Client,
    batch_size: usize,
    pub cache: TranslationCache,
}

impl<'a> Translator<'a> {
    pub fn new(gateway: &'a LlmGateway, free_timeout: Duration, batch_size: usize, cache: TranslationCache) -> Self {
        let client = Client::builder()
            .timeout(free_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            gateway,
            client,
            batch_size: batch_size.max(1),
            cache,
        }
    }

    /// Translate a list of titles, preserving order. `None` entries are
    /// titles that did not need translation or could not be translated.
    pub async fn translate_titles(&mut self, titles: &[String]) -> Vec<Option<String>> {
        let mut results: Vec<Option<String>> = vec![None; titles.len()];
        let mut need_llm: Vec<(usize, String)> = Vec::new();

        for (i, title) in titles.iter().enumerate() {
            if title.is_empty() || !needs_translation(title) {
                continue;
            }
            let clipped = clip_chars(title, MAX_TITLE_CHARS);

            if let Some(cached) = self.cache.get(&clipped) {
                results[i] = Some(cached.clone());
                continue;
            }

            match self.translate_free(&clipped).await {
                Some(zh) => {
                    let zh = clip_chars(&zh, MAX_TRANSLATED_CHARS);
                    self.cache.insert(clipped, zh.clone());
                    results[i] = Some(zh);
                }
                None => need_llm.push((i, clipped)),
            }
        }

        if !need_llm.is_empty() {
            debug!(count = need_llm.len(), "falling back to LLM translation");
            for chunk in need_llm.chunks(self.batch_size) {
                let lines = self.translate_batch_llm(chunk).await;
                for ((i, original), zh) in chunk.iter().zip(lines) {
                    if let Some(zh) = zh {
                        self.cache.insert(original.clone(), zh.clone());
                        results[*i] = Some(zh);
                    }
                }
            }
        }

        if let Err(e) = self.cache.save() {
            warn!(error = %e, "failed to save translation cache");
        }
        debug!(cache_entries = self.cache.len(), "translation cache updated");

        results
    }

    /// Translate one title. Free tier, then LLM.
    pub async fn translate_title(&mut self, title: &str) -> Option<String> {
        if title.is_empty() || !needs_translation(title) {
            return None;
        }
        let clipped = clip_chars(title, MAX_TITLE_CHARS);
        if let Some(cached) = self.cache.get(&clipped) {
            return Some(cached.clone());
        }

        let zh = match self.translate_free(&clipped).await {
            Some(zh) => Some(zh),
            None => {
                let prompt = format!("将以下英文新闻标题译成中文，只输出译文：\n\n{clipped}");
                self.gateway
                    .chat(&[ChatMessage::user(prompt)], 0.2, 80)
                    .await
                    .map(|s| s.trim().trim_matches(['"', '\'']).to_string())
            }
        };

        let zh = zh.map(|s| clip_chars(&s, MAX_TRANSLATED_CHARS))?;
        self.cache.insert(clipped, zh.clone());
        if let Err(e) = self.cache.save() {
            warn!(error = %e, "failed to save translation cache");
        }
        Some(zh)
    }

    /// GET against the free endpoint. Any failure (network, status,
    /// shape, identity result) degrades to `None`.
    async fn translate_free(&self, text: &str) -> Option<String> {
        let response = self
            .client
            .get(FREE_ENDPOINT)
            .query(&[("client", "gtx"), ("sl", "auto"), ("tl", "zh-CN"), ("dt", "t"), ("q", text)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let payload: Value = response.json().await.ok()?;
        let result = reassemble_segments(&payload)?;
        if result.is_empty() || result == text { None } else { Some(result) }
    }

    /// One LLM call translating up to `batch_size` titles, one per line.
    async fn translate_batch_llm(&self, batch: &[(usize, String)]) -> Vec<Option<String>> {
        let numbered: Vec<String> = batch.iter().enumerate().map(|(j, (_, t))| format!("{}. {t}", j + 1)).collect();
        let prompt = format!(
            "将以下{}条英文新闻标题译成中文，每行一条，只输出译文：\n\n{}",
            batch.len(),
            numbered.join("\n")
        );

        let Some(response) = self.gateway.chat(&[ChatMessage::user(prompt)], 0.2, 400).await else {
            return vec![None; batch.len()];
        };

        let lines: Vec<String> = response
            .lines()
            .map(|l| strip_line_number(l.trim()).to_string())
            .filter(|l| !l.is_empty())
            .collect();

        (0..batch.len())
            .map(|j| lines.get(j).map(|l| clip_chars(l, MAX_TRANSLATED_CHARS)))
            .collect()
    }
}

/// Titles already ≥30% Han characters stay as they are.
pub fn needs_translation(text: &str) -> bool {
    normalize::han_ratio(text) < 0.3
}

/// The free endpoint returns `[[["译文","original",...],...],...]`;
/// the translation is the concatenation of each segment's first element.
fn reassemble_segments(payload: &Value) -> Option<String> {
    let segments = payload.as_array()?.first()?.as_array()?;
    let mut out = String::new();
    for seg in segments {
        if let Some(text) = seg.as_array().and_then(|s| s.first()).and_then(|v| v.as_str()) {
            out.push_str(text);
        }
    }
    Some(out.trim().to_string())
}

fn strip_line_number(line: &str) -> &str {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.split_once('.').filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit())) else {
        return trimmed;
    };
    rest.1.trim_start()
}

fn clip_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_titles_skip_translation() {
        assert!(!needs_translation("OpenAI 发布新一代大模型产品"));
        assert!(needs_translation("OpenAI launches new model"));
    }

    #[test]
    fn segments_reassemble_in_order() {
        let payload: Value = serde_json::from_str(
            r#"[[["你好","Hello",null],["世界","world",null]],null,"en"]"#,
        )
        .unwrap();
        assert_eq!(reassemble_segments(&payload).unwrap(), "你好世界");
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let payload: Value = serde_json::from_str(r#"{"error": 500}"#).unwrap();
        assert!(reassemble_segments(&payload).is_none());
    }

    #[test]
    fn cache_evicts_oldest_beyond_capacity() {
        let mut cache = TranslationCache::load(None);
        for i in 0..(CACHE_CAPACITY + 10) {
            cache.insert(format!("title {i}"), format!("标题 {i}"));
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(cache.get("title 0").is_none());
        assert!(cache.get(&format!("title {}", CACHE_CAPACITY + 9)).is_some());
    }

    #[test]
    fn cache_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("title-zh-cache.json");

        let mut cache = TranslationCache::load(Some(path.clone()));
        cache.insert("Hello world".to_string(), "你好世界".to_string());
        cache.save().unwrap();

        let reloaded = TranslationCache::load(Some(path));
        assert_eq!(reloaded.get("Hello world").unwrap(), "你好世界");
    }

    #[tokio::test]
    async fn cache_hit_skips_external_services() {
        // Unconfigured gateway and a dead-end client: a cache hit must
        // come back without touching either.
        let config: crate::config::Config = toml::from_str("").unwrap();
        let gateway = LlmGateway::new(&config);
        let mut cache = TranslationCache::load(None);
        cache.insert("Hello world".to_string(), "你好世界".to_string());
        let mut translator = Translator::new(&gateway, Duration::from_millis(1), 5, cache);

        let result = translator.translate_title("Hello world").await;
        assert_eq!(result.as_deref(), Some("你好世界"));
    }

    #[test]
    fn line_numbers_are_stripped() {
        assert_eq!(strip_line_number("1. 你好"), "你好");
        assert_eq!(strip_line_number("12. 标题"), "标题");
        assert_eq!(strip_line_number("无编号标题"), "无编号标题");
    }
}
