use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::fetch::Fetcher;
use crate::models::RawItem;
use crate::normalize;

/// Bodies shorter than this are considered missing and worth a fetch.
const MIN_BODY_CHARS: usize = 100;
/// Generic extraction needs this much text to be trusted.
const MIN_GENERIC_CHARS: usize = 200;

/// Best-effort article body extraction: a readability-style density pick,
/// then site-specific selectors, then generic containers. Every tier can
/// fail; the caller gets whatever survived, capped at `max_length`.
pub struct ContentExtractor<'a> {
    fetcher: &'a Fetcher,
    max_length: usize,
    delay: Duration,
}

impl<'a> ContentExtractor<'a> {
    pub fn new(fetcher: &'a Fetcher, max_length: usize, delay: Duration) -> Self {
        Self {
            fetcher,
            max_length,
            delay,
        }
    }

    /// Fill in bodies for items that lack one. Also backfills `pub_time`
    /// from page metadata when the feed had none.
    pub async fn enrich(&self, items: &mut [&mut RawItem]) {
        let needing: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.content.chars().count() < MIN_BODY_CHARS)
            .map(|(idx, _)| idx)
            .collect();
        if needing.is_empty() {
            return;
        }
        info!(count = needing.len(), "extracting article bodies");

        for (n, idx) in needing.into_iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let url = items[idx].url.clone();
            let (content, page_time) = self.extract(&url).await;
            debug!(url = %url, chars = content.chars().count(), "body extracted");
            if !content.is_empty() {
                items[idx].content = content;
            }
            if items[idx].pub_time.is_none()
                && let Some(ts) = page_time.and_then(|s| normalize::parse_flexible_time(&s))
            {
                items[idx].pub_time = Some(ts);
            }
        }
    }

    /// Extract (body, page timestamp string) from one URL. Failures give
    /// an empty body.
    pub async fn extract(&self, url: &str) -> (String, Option<String>) {
        let html = match self.fetcher.get_text(url).await {
            Ok(html) => html,
            Err(e) => {
                debug!(url = %url, error = %e, "body fetch failed");
                return (String::new(), None);
            }
        };

        let mut content = readability_extract(&html);
        if content.chars().count() < MIN_BODY_CHARS {
            content = site_specific_extract(&html, url);
        }
        if content.chars().count() < MIN_BODY_CHARS {
            content = generic_extract(&html);
        }

        if content.chars().count() > self.max_length {
            content = content.chars().take(self.max_length).collect::<String>() + "...";
        }

        let page_time = extract_page_time(&html);
        (content, page_time)
    }
}

/// Readability-style tier: pick the container with the highest paragraph
/// text density anywhere in the document.
pub fn readability_extract(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(candidate_sel) = Selector::parse("article, main, section, div") else {
        return String::new();
    };
    let Ok(p_sel) = Selector::parse("p") else {
        return String::new();
    };

    let mut best_text = String::new();
    let mut best_score = 0usize;

    for container in doc.select(&candidate_sel) {
        let paragraphs: Vec<String> = container.select(&p_sel).map(|p| collect_text(&p)).collect();
        if paragraphs.len() < 2 {
            continue;
        }
        let text = paragraphs.join("\n");
        // Density score: paragraph text weighted by paragraph count, so a
        // page-wide wrapper with nav noise loses to the article body.
        let score = text.chars().count() * paragraphs.len().min(10);
        if score > best_score {
            best_score = score;
            best_text = text;
        }
    }

    best_text.trim().to_string()
}

/// Known layouts get exact selectors.
pub fn site_specific_extract(html: &str, url: &str) -> String {
    let css = if url.contains("techcrunch.com") {
        ".article-content, .entry-content"
    } else if url.contains("theverge.com") {
        ".duet--article--article-body-component, article"
    } else if url.contains("36kr.com") {
        ".article-content, .common-width"
    } else {
        "article, .article-content, main"
    };

    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse(css) else {
        return String::new();
    };
    doc.select(&sel).next().map(|e| collect_text(&e)).unwrap_or_default()
}

/// Last tier: strip chrome elements and take the first substantial
/// generic container.
pub fn generic_extract(html: &str) -> String {
    let doc = Html::parse_document(html);
    for css in ["article", "main", ".content", "#content"] {
        let Ok(sel) = Selector::parse(css) else { continue };
        if let Some(element) = doc.select(&sel).next() {
            let text = collect_text_skipping_chrome(&element);
            if text.chars().count() > MIN_GENERIC_CHARS {
                return text;
            }
        }
    }
    String::new()
}

/// Page publication timestamp: <time datetime>, article:published_time
/// meta, or a bare ISO timestamp anywhere in the page.
pub fn extract_page_time(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    if let Ok(sel) = Selector::parse("time")
        && let Some(el) = doc.select(&sel).next()
    {
        if let Some(dt) = el.value().attr("datetime") {
            return Some(dt.to_string());
        }
        let text = collect_text(&el);
        if !text.is_empty() {
            return Some(text);
        }
    }

    if let Ok(sel) = Selector::parse(r#"meta[property="article:published_time"]"#)
        && let Some(el) = doc.select(&sel).next()
        && let Some(content) = el.value().attr("content")
    {
        return Some(content.to_string());
    }

    static ISO_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = ISO_RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("valid regex"));
    re.find(html).map(|m| m.as_str().to_string())
}

fn collect_text(element: &scraper::ElementRef) -> String {
    element
        .text()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

const CHROME_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];

fn collect_text_skipping_chrome(element: &scraper::ElementRef) -> String {
    let mut parts: Vec<String> = Vec::new();
    collect_recursive(element, &mut parts);
    parts.join("\n")
}

fn collect_recursive(element: &scraper::ElementRef, out: &mut Vec<String>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let t = text.trim();
            if !t.is_empty() {
                out.push(t.to_string());
            }
        } else if let Some(child_el) = scraper::ElementRef::wrap(child) {
            if CHROME_TAGS.contains(&child_el.value().name()) {
                continue;
            }
            collect_recursive(&child_el, out);
        }
    }
}
