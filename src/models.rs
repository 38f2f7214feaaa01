use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an item came from, relative to the story it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// First-party vendor blog / announcement feed.
    Official,
    EnMedia,
    ZhMedia,
    /// Loaded from the companion pipeline's shared archive.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

/// A normalized ingestion unit, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_key: String,
    pub source_name: String,
    pub source_type: SourceType,
    pub language: Language,
    pub pub_time: Option<DateTime<Utc>>,
    pub summary: String,
    pub content: String,
}

/// The five editorial sections of the daily digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BigTech,
    AiProducts,
    AiTech,
    AiGaming,
    IndustryNews,
}

impl Category {
    /// Fixed bucket order used by the renderers.
    pub const ALL: [Category; 5] = [
        Category::BigTech,
        Category::AiProducts,
        Category::AiTech,
        Category::AiGaming,
        Category::IndustryNews,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Category::BigTech => "big_tech",
            Category::AiProducts => "ai_products",
            Category::AiTech => "ai_tech",
            Category::AiGaming => "ai_gaming",
            Category::IndustryNews => "industry_news",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::BigTech => "大厂动态",
            Category::AiProducts => "AI应用与产品",
            Category::AiTech => "AI模型与技术",
            Category::AiGaming => "AI与游戏",
            Category::IndustryNews => "行业新闻",
        }
    }
}

/// An admitted item carrying its relevance score and AI-derived fields.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub raw: RawItem,
    pub relevance_score: f64,
    pub keywords_matched: Vec<String>,
    pub is_gaming_related: bool,
    pub summary_cn: String,
    pub title_cn: String,
    pub category: Option<Category>,
}

impl ScoredItem {
    pub fn new(raw: RawItem, relevance_score: f64, keywords_matched: Vec<String>, is_gaming_related: bool) -> Self {
        Self {
            raw,
            relevance_score,
            keywords_matched,
            is_gaming_related,
            summary_cn: String::new(),
            title_cn: String::new(),
            category: None,
        }
    }

    /// Chinese title if one was produced, else the original.
    pub fn display_title(&self) -> &str {
        if self.title_cn.is_empty() {
            &self.raw.title
        } else {
            &self.title_cn
        }
    }

    pub fn display_summary(&self) -> &str {
        if self.summary_cn.is_empty() {
            &self.raw.summary
        } else {
            &self.summary_cn
        }
    }
}

/// A persisted archive entry. `first_seen_at` is written once at insertion
/// and never mutated; `last_seen_at` moves forward on every sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub site_id: String,
    pub site_name: String,
    pub source: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_zh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
}

impl ArchiveRecord {
    /// Best event timestamp for windowing: published time, else first seen.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.first_seen_at)
    }

    /// Retention timestamp: the latest signal that the record is alive.
    pub fn retention_time(&self) -> DateTime<Utc> {
        let mut ts = self.last_seen_at;
        if let Some(p) = self.published_at
            && p > ts
        {
            ts = p;
        }
        if self.first_seen_at > ts {
            ts = self.first_seen_at;
        }
        ts
    }
}

/// Clustering view of an archive record.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub title_zh: Option<String>,
    pub url: String,
    pub source: String,
    pub site_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub entities: BTreeSet<String>,
}

/// A group of items reporting the same event. The seed item is first.
#[derive(Debug, Clone)]
pub struct TopicCluster {
    pub articles: Vec<NewsItem>,
    pub sources: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub representative_title: String,
}

impl TopicCluster {
    pub fn count(&self) -> usize {
        self.articles.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Candidate summary persisted to candidates.json for operator selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub topic_id: usize,
    pub title: String,
    pub article_count: usize,
    pub source_count: usize,
    pub sample_titles: Vec<String>,
    pub sources: Vec<String>,
    pub entities: Vec<String>,
}

/// Per-source fetch outcome, collected by the orchestrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub site_id: String,
    pub site_name: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub item_count: usize,
}

impl SourceStatus {
    pub fn ok(site_id: &str, site_name: &str, item_count: usize) -> Self {
        Self {
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            ok: true,
            error: None,
            item_count,
        }
    }

    pub fn failed(site_id: &str, site_name: &str, error: String) -> Self {
        Self {
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            ok: false,
            error: Some(error),
            item_count: 0,
        }
    }
}
