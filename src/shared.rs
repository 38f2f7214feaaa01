use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cluster;
use crate::models::{NewsItem, RawItem, SourceType};
use crate::normalize;

/// Reads the companion pipeline's output files. The pre-filtered
/// latest-24h feed is preferred; the full archive is the fallback.
pub struct SharedLoader {
    dir: PathBuf,
}

impl SharedLoader {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    /// Load raw items from the shared data within the trailing window.
    /// Items without any timestamp are kept.
    pub fn load(&self, now: DateTime<Utc>, hours: u32) -> Vec<RawItem> {
        let entries = self.load_entries();
        if entries.is_empty() {
            return Vec::new();
        }
        let cutoff = now - Duration::hours(hours as i64);

        let items: Vec<RawItem> = entries
            .iter()
            .filter_map(|entry| parse_entry(entry))
            .filter(|item| item.pub_time.is_none_or(|t| t >= cutoff))
            .collect();

        info!(count = items.len(), hours, "loaded shared data");
        items
    }

    /// Load the clustering view, preferring the pre-filtered AI items.
    pub fn load_news_items(&self, now: DateTime<Utc>, hours: u32) -> Vec<NewsItem> {
        let entries = self.load_entries();
        let cutoff = now - Duration::hours(hours as i64);

        entries
            .iter()
            .filter_map(|entry| {
                let title = string_field(entry, &["title"])?;
                let url = string_field(entry, &["url", "link"])?;
                let published = timestamp_field(entry);
                if published.is_some_and(|t| t < cutoff) {
                    return None;
                }
                let id = string_field(entry, &["id"]).unwrap_or_else(|| normalize::item_id(&url));
                let title_zh = string_field(entry, &["title_zh"]);
                let source = string_field(entry, &["source", "site_name"]).unwrap_or_default();
                let site_id = string_field(entry, &["site_id"]).unwrap_or_else(|| "shared".to_string());
                Some(cluster::to_news_item(
                    &id,
                    &title,
                    title_zh.as_deref(),
                    &url,
                    &source,
                    &site_id,
                    published,
                ))
            })
            .collect()
    }

    /// Pull entry objects out of latest-24h.json (items_ai, then items),
    /// falling back to archive.json.
    fn load_entries(&self) -> Vec<Value> {
        let latest = self.dir.join("latest-24h.json");
        if let Some(doc) = read_json(&latest) {
            for key in ["items_ai", "items"] {
                if let Some(items) = doc.get(key).and_then(|v| v.as_array())
                    && !items.is_empty()
                {
                    debug!(file = "latest-24h.json", key, count = items.len(), "using shared feed");
                    return items.clone();
                }
            }
        }

        let archive = self.dir.join("archive.json");
        if let Some(doc) = read_json(&archive) {
            let items = match &doc {
                Value::Array(list) => list.clone(),
                _ => doc.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default(),
            };
            if !items.is_empty() {
                debug!(file = "archive.json", count = items.len(), "using shared archive");
                return items;
            }
        }

        warn!(dir = %self.dir.display(), "no shared data available");
        Vec::new()
    }
}

fn read_json(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path).map_err(anyhow::Error::from).and_then(|c| {
        serde_json::from_str::<Value>(&c).map_err(anyhow::Error::from)
    }) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "shared file unreadable");
            None
        }
    }
}

/// Map one shared entry to a RawItem, tolerating the field-name variants
/// that accumulated upstream.
fn parse_entry(entry: &Value) -> Option<RawItem> {
    let title = string_field(entry, &["title"])?;
    let url = string_field(entry, &["url", "link"])?;
    if title.is_empty() || url.is_empty() {
        return None;
    }

    let id = string_field(entry, &["id"]).unwrap_or_else(|| normalize::item_id(&url));
    let pub_time = timestamp_field(entry);

    let source = string_field(entry, &["source", "site_name"]).unwrap_or_default();
    let source_key = match string_field(entry, &["site_id"]) {
        Some(site_id) if !site_id.is_empty() => site_id,
        _ if !source.is_empty() => format!("shared_{source}"),
        _ => "shared".to_string(),
    };
    let source_name = if source.is_empty() { "AI热讯".to_string() } else { source };

    let summary = string_field(entry, &["summary", "description"]).unwrap_or_default();

    Some(RawItem {
        language: normalize::detect_language(&title),
        id,
        title,
        url,
        source_key,
        source_name,
        source_type: SourceType::Shared,
        pub_time,
        summary,
        content: String::new(),
    })
}

fn string_field(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| entry.get(k).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Timestamp under any of the historical names, numeric epoch included.
fn timestamp_field(entry: &Value) -> Option<DateTime<Utc>> {
    for key in ["published_at", "first_seen_at", "timestamp", "pubDate", "pub_time"] {
        let Some(value) = entry.get(key) else { continue };
        if let Some(n) = value.as_i64()
            && let Some(dt) = Utc.timestamp_opt(n, 0).single()
        {
            return Some(dt);
        }
        if let Some(s) = value.as_str()
            && let Some(dt) = normalize::parse_flexible_time(s)
        {
            return Some(dt);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_shared(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn prefers_latest_feed_over_archive() {
        let dir = tempfile::tempdir().unwrap();
        write_shared(
            dir.path(),
            "latest-24h.json",
            r#"{"items_ai": [{"title": "From latest", "url": "https://a.com/1", "site_id": "techmeme"}]}"#,
        );
        write_shared(
            dir.path(),
            "archive.json",
            r#"{"items": [{"title": "From archive", "url": "https://a.com/2"}]}"#,
        );

        let loader = SharedLoader::new(dir.path());
        let items = loader.load(Utc::now(), 28);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "From latest");
        assert_eq!(items[0].source_key, "techmeme");
        assert_eq!(items[0].source_type, SourceType::Shared);
    }

    #[test]
    fn falls_back_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        write_shared(
            dir.path(),
            "archive.json",
            r#"{"items": [{"title": "Archived story", "link": "https://a.com/2", "source": "TechCrunch"}]}"#,
        );

        let loader = SharedLoader::new(dir.path());
        let items = loader.load(Utc::now(), 28);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_key, "shared_TechCrunch");
        assert_eq!(items[0].source_name, "TechCrunch");
    }

    #[test]
    fn window_keeps_timeless_items() {
        let dir = tempfile::tempdir().unwrap();
        write_shared(
            dir.path(),
            "latest-24h.json",
            r#"{"items": [
                {"title": "No timestamp", "url": "https://a.com/1"},
                {"title": "Too old", "url": "https://a.com/2", "published_at": "2020-01-01T00:00:00Z"},
                {"title": "Fresh", "url": "https://a.com/3", "published_at": "2025-01-10T10:00:00Z"}
            ]}"#,
        );

        let loader = SharedLoader::new(dir.path());
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let items = loader.load(now, 28);
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["No timestamp", "Fresh"]);
    }

    #[test]
    fn missing_dir_is_empty_not_fatal() {
        let loader = SharedLoader::new(Path::new("/nonexistent/shared"));
        assert!(loader.load(Utc::now(), 28).is_empty());
    }

    #[test]
    fn language_detected_from_title() {
        let dir = tempfile::tempdir().unwrap();
        write_shared(
            dir.path(),
            "latest-24h.json",
            r#"{"items": [{"title": "OpenAI 发布全新模型", "url": "https://a.com/1"}]}"#,
        );
        let loader = SharedLoader::new(dir.path());
        let items = loader.load(Utc::now(), 28);
        assert_eq!(items[0].language, crate::models::Language::Zh);
    }

    #[test]
    fn epoch_timestamps_are_understood() {
        let entry: Value = serde_json::from_str(r#"{"timestamp": 1736510400}"#).unwrap();
        let ts = timestamp_field(&entry).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-01-10T12:00:00+00:00");
    }
}
