use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::keywords;
use crate::models::{ArchiveRecord, RawItem, SourceStatus};
use crate::normalize;

/// The one source whose feed timestamps are canonical; its sightings may
/// overwrite an already-recorded published_at.
const STREAM_SOURCE: &str = "opmlrss";

/// A sighting to be folded into the archive.
#[derive(Debug, Clone)]
pub struct IncomingRecord {
    pub site_id: String,
    pub site_name: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl IncomingRecord {
    pub fn from_raw(item: &RawItem) -> Self {
        Self {
            site_id: item.source_key.clone(),
            site_name: item.source_name.clone(),
            source: item.source_name.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            published_at: item.pub_time,
        }
    }
}

#[derive(Deserialize)]
struct ArchiveDocument {
    #[serde(default)]
    items: Vec<ArchiveRecord>,
}

/// Keyed store of every item ever seen, persisted as a single JSON
/// document. Read once at start of a run, written atomically at the end.
pub struct ArchiveStore {
    path: PathBuf,
    records: HashMap<String, ArchiveRecord>,
}

impl ArchiveStore {
    pub fn load(path: PathBuf) -> Self {
        let mut records = HashMap::new();
        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|c| serde_json::from_str::<ArchiveDocument>(&c).map_err(anyhow::Error::from))
            {
                Ok(doc) => {
                    for record in doc.items {
                        records.insert(record.id.clone(), record);
                    }
                    info!(items = records.len(), path = %path.display(), "archive loaded");
                }
                Err(e) => warn!(error = %e, "archive unreadable, starting empty"),
            }
        }
        Self { path, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ArchiveRecord> {
        self.records.get(id)
    }

    /// Fold one sighting into the store. New ids get
    /// `first_seen_at = last_seen_at = now`; existing records update their
    /// mutable fields and advance `last_seen_at`. `published_at` is only
    /// overwritten for the stream-type source, or when missing.
    pub fn upsert(&mut self, incoming: &IncomingRecord, now: DateTime<Utc>) {
        let title = incoming.title.trim();
        let url = normalize::canonicalize_url(&incoming.url);
        if title.is_empty() || !url.starts_with("http") {
            return;
        }
        let id = normalize::item_id(&url);

        match self.records.get_mut(&id) {
            Some(existing) => {
                existing.site_id = incoming.site_id.clone();
                existing.site_name = incoming.site_name.clone();
                existing.source = incoming.source.clone();
                existing.title = title.to_string();
                existing.url = url;
                if let Some(published) = incoming.published_at
                    && (incoming.site_id == STREAM_SOURCE || existing.published_at.is_none())
                {
                    existing.published_at = Some(published);
                }
                existing.last_seen_at = now;
            }
            None => {
                self.records.insert(
                    id.clone(),
                    ArchiveRecord {
                        id,
                        site_id: incoming.site_id.clone(),
                        site_name: incoming.site_name.clone(),
                        source: incoming.source.clone(),
                        title: title.to_string(),
                        url,
                        published_at: incoming.published_at,
                        first_seen_at: now,
                        last_seen_at: now,
                        title_zh: None,
                        title_en: None,
                    },
                );
            }
        }
    }

    pub fn set_title_zh(&mut self, id: &str, title_zh: String) {
        if let Some(record) = self.records.get_mut(id) {
            record.title_zh = Some(title_zh);
        }
    }

    /// Drop records older than the retention horizon. Called once, at the
    /// end of a run, never during ingestion, so retries stay idempotent.
    pub fn prune(&mut self, now: DateTime<Utc>, retain_days: i64) -> usize {
        let keep_after = now - Duration::days(retain_days);
        let before = self.records.len();
        self.records.retain(|_, r| r.retention_time() >= keep_after);
        let removed = before - self.records.len();
        if removed > 0 {
            info!(removed, remaining = self.records.len(), "archive pruned");
        }
        removed
    }

    /// Records whose event time falls inside the trailing window,
    /// normalized for display (mojibake repair, source display names,
    /// placeholder titles dropped), newest first.
    pub fn window_records(&self, now: DateTime<Utc>, hours: u32) -> Vec<ArchiveRecord> {
        let start = now - Duration::hours(hours as i64);
        let mut records: Vec<ArchiveRecord> = self
            .records
            .values()
            .filter(|r| r.event_time() >= start)
            .cloned()
            .map(|mut r| {
                r.title = normalize::fix_mojibake(&r.title);
                r.source = normalize::fix_mojibake(&normalize::normalize_source_display(&r.site_id, &r.source));
                r
            })
            .filter(|r| !normalize::is_placeholder_title(&r.site_id, &r.title))
            .collect();
        records.sort_by(|a, b| b.event_time().cmp(&a.event_time()));
        records
    }

    /// Write the archive document atomically (write-then-rename),
    /// sorted by last_seen_at descending.
    pub fn save(&self, now: DateTime<Utc>) -> Result<()> {
        let mut items: Vec<&ArchiveRecord> = self.records.values().collect();
        items.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));

        let payload = json!({
            "generated_at": now.to_rfc3339(),
            "total_items": items.len(),
            "items": items,
        });
        write_json_atomic(&self.path, &payload)?;
        info!(items = items.len(), path = %self.path.display(), "archive saved");
        Ok(())
    }
}

/// True when the record's titles hit the core AI keyword tier.
pub fn is_ai_related(record: &ArchiveRecord) -> bool {
    let tables = keywords::tables();
    let mut text = record.title.clone();
    if let Some(zh) = &record.title_zh {
        text.push(' ');
        text.push_str(zh);
    }
    tables.core.any_match(&text)
}

/// Collapse records sharing a canonical URL or a normalized title,
/// keeping the first occurrence (input is newest-first).
pub fn dedupe_by_title_url(records: &[ArchiveRecord]) -> Vec<ArchiveRecord> {
    let mut seen_urls = std::collections::HashSet::new();
    let mut seen_titles = std::collections::HashSet::new();
    let mut out = Vec::new();
    for record in records {
        let url = normalize::canonicalize_url(&record.url);
        let title = crate::dedup::normalize_title(&record.title);
        if seen_urls.contains(&url) || (!title.is_empty() && seen_titles.contains(&title)) {
            continue;
        }
        seen_urls.insert(url);
        seen_titles.insert(title);
        out.push(record.clone());
    }
    out
}

/// Per-site counters for the latest-24h payload.
pub fn site_stats(items_ai: &[ArchiveRecord], items_all: &[ArchiveRecord]) -> Vec<Value> {
    let mut raw_counts: HashMap<&str, usize> = HashMap::new();
    let mut names: HashMap<&str, &str> = HashMap::new();
    for r in items_all {
        *raw_counts.entry(r.site_id.as_str()).or_default() += 1;
        names.entry(r.site_id.as_str()).or_insert(r.site_name.as_str());
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for r in items_ai {
        *counts.entry(r.site_id.as_str()).or_default() += 1;
        names.entry(r.site_id.as_str()).or_insert(r.site_name.as_str());
    }

    let mut stats: Vec<Value> = names
        .iter()
        .map(|(site_id, site_name)| {
            json!({
                "site_id": site_id,
                "site_name": site_name,
                "count": counts.get(site_id).copied().unwrap_or(0),
                "raw_count": raw_counts.get(site_id).copied().unwrap_or(0),
            })
        })
        .collect();
    stats.sort_by_key(|s| std::cmp::Reverse(s["count"].as_u64().unwrap_or(0)));
    stats
}

/// The shared latest-24h.json snapshot consumed by the daily pipeline and
/// the frontends.
pub fn build_latest_payload(
    now: DateTime<Utc>,
    window_hours: u32,
    items_ai_dedup: &[ArchiveRecord],
    items_ai_raw: &[ArchiveRecord],
    items_all_raw: &[ArchiveRecord],
    items_all_dedup: &[ArchiveRecord],
    archive_total: usize,
) -> Value {
    let stats = site_stats(items_ai_dedup, items_all_raw);
    json!({
        "generated_at": now.to_rfc3339(),
        "window_hours": window_hours,
        "total_items": items_ai_dedup.len(),
        "total_items_ai_raw": items_ai_raw.len(),
        "total_items_raw": items_all_raw.len(),
        "total_items_all_mode": items_all_dedup.len(),
        "archive_total": archive_total,
        "site_count": stats.len(),
        "site_stats": stats,
        "items": items_ai_dedup,
        "items_ai": items_ai_dedup,
        "items_all_raw": items_all_raw,
        "items_all": items_all_dedup,
    })
}

pub fn build_status_payload(now: DateTime<Utc>, statuses: &[SourceStatus], fetched_raw: usize, in_window: usize) -> Value {
    json!({
        "generated_at": now.to_rfc3339(),
        "sites": statuses,
        "successful_sites": statuses.iter().filter(|s| s.ok).count(),
        "failed_sites": statuses.iter().filter(|s| !s.ok).map(|s| s.site_id.as_str()).collect::<Vec<_>>(),
        "zero_item_sites": statuses
            .iter()
            .filter(|s| s.ok && s.item_count == 0)
            .map(|s| s.site_id.as_str())
            .collect::<Vec<_>>(),
        "fetched_raw_items": fetched_raw,
        "items_in_24h": in_window,
    })
}

/// Pretty-printed UTF-8 JSON, written to a temp file in the target
/// directory and renamed into place.
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).context("creating temp file")?;
    tmp.write_all(serde_json::to_string_pretty(value)?.as_bytes())
        .context("writing temp file")?;
    tmp.persist(path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn incoming(site_id: &str, title: &str, url: &str, published: Option<DateTime<Utc>>) -> IncomingRecord {
        IncomingRecord {
            site_id: site_id.to_string(),
            site_name: site_id.to_string(),
            source: site_id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            published_at: published,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn first_seen_is_write_once_and_last_seen_advances() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));

        store.upsert(&incoming("siteA", "Title", "https://example.com/a", None), at(1));
        store.upsert(&incoming("siteA", "Title updated", "https://example.com/a", None), at(5));

        let id = normalize::item_id("https://example.com/a");
        let record = store.get(&id).unwrap();
        assert_eq!(record.first_seen_at, at(1));
        assert_eq!(record.last_seen_at, at(5));
        assert_eq!(record.title, "Title updated");
    }

    #[test]
    fn published_at_fills_when_missing_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        let id = normalize::item_id("https://example.com/a");

        store.upsert(&incoming("siteA", "T", "https://example.com/a", Some(at(1))), at(1));
        store.upsert(&incoming("siteA", "T", "https://example.com/a", Some(at(3))), at(3));
        // Non-stream source must not overwrite
        assert_eq!(store.get(&id).unwrap().published_at, Some(at(1)));

        // The stream source carries canonical timestamps and may overwrite
        store.upsert(&incoming("opmlrss", "T", "https://example.com/a", Some(at(4))), at(4));
        assert_eq!(store.get(&id).unwrap().published_at, Some(at(4)));
    }

    #[test]
    fn prune_drops_stale_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        let old = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        store.upsert(&incoming("siteA", "Old", "https://example.com/old", None), old);
        store.upsert(&incoming("siteA", "New", "https://example.com/new", None), at(0));

        let removed = store.prune(at(0), 45);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        let mut store = ArchiveStore::load(path.clone());
        store.upsert(&incoming("siteA", "标题", "https://example.com/a", Some(at(2))), at(2));
        store.save(at(3)).unwrap();

        let reloaded = ArchiveStore::load(path);
        assert_eq!(reloaded.len(), 1);
        let id = normalize::item_id("https://example.com/a");
        let record = reloaded.get(&id).unwrap();
        assert_eq!(record.first_seen_at, at(2));
        assert_eq!(record.title, "标题");
    }

    #[test]
    fn window_excludes_old_and_placeholder_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        store.upsert(&incoming("siteA", "Recent AI story", "https://example.com/r", Some(at(10))), at(10));
        store.upsert(
            &incoming("siteA", "Old story", "https://example.com/o", Some(at(10) - Duration::hours(40))),
            at(10),
        );
        store.upsert(
            &incoming("aihubtoday", "AI资讯日报 1月10日", "https://example.com/p", Some(at(10))),
            at(10),
        );

        let window = store.window_records(at(12), 28);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].title, "Recent AI story");
    }

    #[test]
    fn items_without_title_or_url_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        store.upsert(&incoming("siteA", "", "https://example.com/a", None), at(0));
        store.upsert(&incoming("siteA", "No url", "not-a-url", None), at(0));
        assert!(store.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_of_equal_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        store.upsert(&incoming("siteA", "Same story", "https://a.com/1", Some(at(5))), at(5));
        store.upsert(&incoming("siteB", "Same story", "https://b.com/2", Some(at(4))), at(5));
        let window = store.window_records(at(6), 28);
        let deduped = dedupe_by_title_url(&window);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].site_id, "siteA"); // newest first wins
    }

    #[test]
    fn ai_relatedness_uses_core_tier() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::load(dir.path().join("archive.json"));
        store.upsert(&incoming("s", "New LLM benchmark released", "https://a.com/x", None), at(0));
        store.upsert(&incoming("s", "Stock market wobbles", "https://a.com/y", None), at(0));
        let records: Vec<_> = store.window_records(at(1), 28);
        let ai: Vec<_> = records.iter().filter(|r| is_ai_related(r)).collect();
        assert_eq!(ai.len(), 1);
        assert!(ai[0].title.contains("LLM"));
    }
}
