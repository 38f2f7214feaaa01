use crate::models::{Language, SourceType};

/// How much of an article a source exposes, and how we get the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// RSS links out; full text needs a readability pass on the page.
    Readability,
    /// The feed body is already the complete article.
    RssContent,
    /// The feed body is complete but HTML-heavy.
    RssHtml,
    /// Feed carries only a teaser; body extraction is best-effort.
    SummaryOnly,
    /// No feed at all; site-specific scraping.
    WebScrape,
}

/// A configured ingestion source. The registry is static: sources are
/// vetted by hand and change rarely.
#[derive(Debug, Clone)]
pub struct SourceDef {
    pub key: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub source_type: SourceType,
    pub language: Language,
    pub extraction: ExtractionMethod,
}

pub const SOURCES: &[SourceDef] = &[
    // Full text retrievable from the page
    SourceDef {
        key: "google_research",
        name: "Google Research Blog",
        url: "https://research.google/blog/rss/",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::Readability,
    },
    SourceDef {
        key: "techcrunch_ai",
        name: "TechCrunch AI",
        url: "https://techcrunch.com/category/artificial-intelligence/feed/",
        source_type: SourceType::EnMedia,
        language: Language::En,
        extraction: ExtractionMethod::Readability,
    },
    SourceDef {
        key: "theverge",
        name: "The Verge",
        url: "https://www.theverge.com/rss/index.xml",
        source_type: SourceType::EnMedia,
        language: Language::En,
        extraction: ExtractionMethod::Readability,
    },
    SourceDef {
        key: "github_blog",
        name: "GitHub Blog",
        url: "https://github.blog/feed/",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::Readability,
    },
    // Feed body is already complete
    SourceDef {
        key: "google_workspace",
        name: "Google Workspace Updates",
        url: "https://feeds.feedburner.com/GoogleAppsUpdates",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::RssContent,
    },
    SourceDef {
        key: "guiji_pro",
        name: "硅基观察Pro",
        url: "https://wechat2rss.bestblogs.dev/feed/f21c3e34df9b5fecfda57e2e53512864255ed4cd.xml",
        source_type: SourceType::ZhMedia,
        language: Language::Zh,
        extraction: ExtractionMethod::RssHtml,
    },
    SourceDef {
        key: "founder_park",
        name: "Founder Park",
        url: "https://wechat2rss.bestblogs.dev/feed/f940695505f2be1399d23cc98182297cadf6f90d.xml",
        source_type: SourceType::ZhMedia,
        language: Language::Zh,
        extraction: ExtractionMethod::RssHtml,
    },
    // Teaser-only feeds
    SourceDef {
        key: "xin_zhiyuan",
        name: "新智元",
        url: "https://raw.githubusercontent.com/osnsyc/Wechat-Scholar/main/channels/gh_108f2a2a27f4.xml",
        source_type: SourceType::ZhMedia,
        language: Language::Zh,
        extraction: ExtractionMethod::SummaryOnly,
    },
    SourceDef {
        key: "claude_anthropic",
        name: "Claude (Anthropic)",
        url: "https://api.xgo.ing/rss/user/01f60d63a61b44d692cc35c7feb0b4a4",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::SummaryOnly,
    },
    SourceDef {
        key: "rundown_ai",
        name: "The Rundown AI",
        url: "https://api.xgo.ing/rss/user/83b1ea38940b4a1d81ea57d1ffb12ad7",
        source_type: SourceType::EnMedia,
        language: Language::En,
        extraction: ExtractionMethod::SummaryOnly,
    },
    SourceDef {
        key: "google_deepmind",
        name: "Google DeepMind Blog",
        url: "https://deepmind.google/blog/rss.xml",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::SummaryOnly,
    },
    SourceDef {
        key: "google_blog",
        name: "Google Blog",
        url: "https://blog.google/rss/",
        source_type: SourceType::Official,
        language: Language::En,
        extraction: ExtractionMethod::SummaryOnly,
    },
    // Scraped pages
    SourceDef {
        key: "36kr_ai",
        name: "36氪AI频道",
        url: "https://36kr.com/information/AI",
        source_type: SourceType::ZhMedia,
        language: Language::Zh,
        extraction: ExtractionMethod::WebScrape,
    },
    SourceDef {
        key: "techmeme",
        name: "Techmeme",
        url: "https://techmeme.com",
        source_type: SourceType::EnMedia,
        language: Language::En,
        extraction: ExtractionMethod::WebScrape,
    },
];

pub fn rss_sources() -> impl Iterator<Item = &'static SourceDef> {
    SOURCES.iter().filter(|s| s.extraction != ExtractionMethod::WebScrape)
}

pub fn scrape_sources() -> impl Iterator<Item = &'static SourceDef> {
    SOURCES.iter().filter(|s| s.extraction == ExtractionMethod::WebScrape)
}

/// Editorial priority per source: 1 = first-party announcement channels,
/// 2 = major English media, 3 = Chinese media, everything else 4.
/// Shared-feed keys are looked up after stripping the `shared_` prefix;
/// the bare key "shared" is unknown here and lands on 4.
pub fn source_priority(source_key: &str) -> u8 {
    let clean = source_key.strip_prefix("shared_").unwrap_or(source_key).to_lowercase();
    match clean.as_str() {
        "google_research" | "google_deepmind" | "google_blog" | "google_workspace" | "github_blog"
        | "claude_anthropic" | "openai" | "anthropic" => 1,
        "techcrunch_ai" | "theverge" | "techmeme" | "rundown_ai" | "hackernews" => 2,
        "36kr_ai" | "xin_zhiyuan" | "guiji_pro" | "saibo_chanxin" | "founder_park" | "jiqizhixin" => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keys_are_unique() {
        let mut keys: Vec<_> = SOURCES.iter().map(|s| s.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), SOURCES.len());
    }

    #[test]
    fn shared_prefix_is_stripped_for_priority() {
        assert_eq!(source_priority("shared_techmeme"), 2);
        assert_eq!(source_priority("techmeme"), 2);
    }

    #[test]
    fn bare_shared_key_gets_default_priority() {
        assert_eq!(source_priority("shared"), 4);
    }

    #[test]
    fn scrape_sources_are_the_feedless_ones() {
        let keys: Vec<_> = scrape_sources().map(|s| s.key).collect();
        assert_eq!(keys, ["36kr_ai", "techmeme"]);
    }
}
