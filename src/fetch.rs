use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::{RawItem, SourceStatus};
use crate::normalize;
use crate::sources::{ExtractionMethod, SourceDef};

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Build the shared HTTP client: browser-like headers, request timeout,
/// TLS verification off (several upstream feeds serve broken certs).
pub fn build_client(timeout: Duration) -> Client {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Fetches and parses every configured source. Failures never propagate:
/// each source yields items plus a status record.
pub struct Fetcher {
    client: Client,
    delay: Duration,
}

impl Fetcher {
    pub fn new(client: Client, delay: Duration) -> Self {
        Self { client, delay }
    }

    /// GET a URL as text. Encoding follows the response hint with a UTF-8
    /// fallback (reqwest's charset handling).
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| FetchError::Http {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| FetchError::Http {
            url: url.to_string(),
            source: e,
        })
    }

    /// Fetch every registered source in order (feeds first, then the
    /// scraped pages) with the politeness delay between requests.
    /// Returns all items and one status per source.
    pub async fn fetch_all(&self) -> (Vec<RawItem>, Vec<SourceStatus>) {
        let mut items = Vec::new();
        let mut statuses = Vec::new();

        let ordered: Vec<&SourceDef> = crate::sources::rss_sources().chain(crate::sources::scrape_sources()).collect();
        for (i, source) in ordered.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            match self.fetch_source(source).await {
                Ok(found) => {
                    info!(source = %source.name, items = found.len(), "fetched source");
                    statuses.push(SourceStatus::ok(source.key, source.name, found.len()));
                    items.extend(found);
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "source fetch failed");
                    statuses.push(SourceStatus::failed(source.key, source.name, e.to_string()));
                }
            }
        }

        (items, statuses)
    }

    async fn fetch_source(&self, source: &SourceDef) -> Result<Vec<RawItem>, FetchError> {
        let body = self.get_text(source.url).await?;
        let items = match source.extraction {
            ExtractionMethod::WebScrape => scrape(source, &body),
            _ => parse_rss(&body, source)?,
        };
        if items.is_empty() {
            warn!(source = %source.name, "source returned no usable items");
        }
        Ok(items)
    }
}

/// Parse an RSS/Atom body into raw items. Publication time prefers the
/// entry's published field, then updated (feed-rs normalizes the many
/// string date formats behind both).
pub fn parse_rss(body: &str, source: &SourceDef) -> Result<Vec<RawItem>, FetchError> {
    let feed = feed_rs::parser::parse(body.as_bytes()).map_err(|e| FetchError::Parse {
        url: source.url.to_string(),
        message: e.to_string(),
    })?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.as_ref().map(|t| t.content.trim().to_string())?;
            let url = entry.links.first().map(|l| l.href.clone())?;
            if title.is_empty() || url.is_empty() {
                return None;
            }

            let pub_time: Option<DateTime<Utc>> = entry.published.or(entry.updated);

            let raw_summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let summary: String = strip_html(&raw_summary).chars().take(500).collect();

            Some(RawItem {
                id: normalize::item_id(&url),
                title,
                url: normalize::canonicalize_url(&url),
                source_key: source.key.to_string(),
                source_name: source.name.to_string(),
                source_type: source.source_type,
                language: source.language,
                pub_time,
                summary,
                content: String::new(),
            })
        })
        .collect();

    Ok(items)
}

/// Site-specific scraping registry. Unknown sites return nothing.
pub fn scrape(source: &SourceDef, html: &str) -> Vec<RawItem> {
    match source.key {
        "36kr_ai" => parse_36kr(source, html),
        "techmeme" => parse_techmeme(source, html),
        other => {
            debug!(site = other, "no scraper registered");
            Vec::new()
        }
    }
}

fn parse_36kr(source: &SourceDef, html: &str) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();

    let Ok(article_sel) = Selector::parse("div.article-item, .kr-flow-article-item, article") else {
        return items;
    };
    let Ok(title_sel) = Selector::parse("a.article-item-title, h2 a, a[href*='/p/']") else {
        return items;
    };
    let Ok(summary_sel) = Selector::parse(".article-item-description, p") else {
        return items;
    };

    for article in doc.select(&article_sel).take(20) {
        let Some(link) = article.select(&title_sel).next() else {
            continue;
        };
        let title = element_text(&link);
        let Some(href) = link.value().attr("href") else { continue };
        if title.is_empty() {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("https://36kr.com{href}")
        };

        let summary = article.select(&summary_sel).next().map(|e| element_text(&e)).unwrap_or_default();

        items.push(RawItem {
            id: normalize::item_id(&url),
            title,
            url: normalize::canonicalize_url(&url),
            source_key: source.key.to_string(),
            source_name: source.name.to_string(),
            source_type: source.source_type,
            language: source.language,
            pub_time: None,
            summary: summary.chars().take(500).collect(),
            content: String::new(),
        });
    }

    items
}

fn parse_techmeme(source: &SourceDef, html: &str) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();

    let Ok(item_sel) = Selector::parse(".clus .ii, div.ii") else {
        return items;
    };
    let Ok(link_sel) = Selector::parse("a.ourh, a") else {
        return items;
    };
    let Ok(cite_sel) = Selector::parse(".cite2, cite") else {
        return items;
    };

    for block in doc.select(&item_sel).take(30) {
        let Some(link) = block.select(&link_sel).next() else {
            continue;
        };
        let title = element_text(&link);
        let Some(href) = link.value().attr("href") else { continue };
        if title.is_empty() {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("https://techmeme.com/{}", href.trim_start_matches('/'))
        };

        let source_name = block
            .select(&cite_sel)
            .next()
            .map(|e| element_text(&e))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| source.name.to_string());

        items.push(RawItem {
            id: normalize::item_id(&url),
            title,
            url: normalize::canonicalize_url(&url),
            source_key: source.key.to_string(),
            source_name,
            source_type: source.source_type,
            language: source.language,
            pub_time: None,
            summary: String::new(),
            content: String::new(),
        });
    }

    items
}

fn element_text(element: &scraper::ElementRef) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert HTML to plain text. Non-HTML input passes through unchanged.
pub fn strip_html(text: &str) -> String {
    if !text.contains('<') {
        return text.trim().to_string();
    }
    html2text::from_read(text.as_bytes(), 200)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SOURCES;

    fn find_source(key: &str) -> &'static SourceDef {
        SOURCES.iter().find(|s| s.key == key).unwrap()
    }

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Feed</title>
<item>
  <title>OpenAI launches GPT-5</title>
  <link>https://example.com/gpt5?utm_source=rss</link>
  <description><![CDATA[<p>The <b>new</b> model is out.</p>]]></description>
  <pubDate>Fri, 10 Jan 2025 12:00:00 GMT</pubDate>
</item>
<item>
  <title></title>
  <link>https://example.com/empty</link>
</item>
</channel></rss>"#;

    #[test]
    fn rss_entries_become_raw_items() {
        let source = find_source("techcrunch_ai");
        let items = parse_rss(RSS_SAMPLE, source).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "OpenAI launches GPT-5");
        // URL canonicalized, tracking param gone
        assert_eq!(item.url, "https://example.com/gpt5");
        assert!(item.pub_time.is_some());
        assert!(item.summary.contains("new"));
        assert!(!item.summary.contains('<'));
    }

    #[test]
    fn malformed_feed_is_a_parse_error() {
        let source = find_source("techcrunch_ai");
        assert!(parse_rss("this is not xml", source).is_err());
    }

    #[test]
    fn techmeme_scrape_extracts_titles() {
        let html = r#"<html><body>
          <div class="clus">
            <div class="ii"><a class="ourh" href="https://example.com/story">Anthropic releases new Claude model</a>
              <cite class="cite2">The Verge</cite></div>
            <div class="ii"><a class="ourh" href="/local">Relative link story</a></div>
          </div>
        </body></html>"#;
        let source = find_source("techmeme");
        let items = scrape(source, html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_name, "The Verge");
        assert!(items[1].url.starts_with("https://techmeme.com/"));
    }

    #[test]
    fn unknown_site_scrapes_to_empty() {
        let source = find_source("theverge");
        assert!(scrape(source, "<html></html>").is_empty());
    }

    #[test]
    fn strip_html_passthrough_for_plain_text() {
        assert_eq!(strip_html("no markup here"), "no markup here");
        assert!(!strip_html("<p>hello <b>world</b></p>").contains('<'));
    }
}
