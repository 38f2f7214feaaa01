use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::classify;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::extract::ContentExtractor;
use crate::fetch::{Fetcher, build_client};
use crate::filter;
use crate::llm::{ChatMessage, LlmGateway};
use crate::models::{Category, RawItem, ScoredItem};
use crate::normalize;
use crate::publish::WeChatDraft;
use crate::render;
use crate::shared::SharedLoader;
use crate::summarize::{self, Summarizer};
use crate::translate::{TranslationCache, Translator};

/// Below this many shared items, the independent fetchers kick in.
const MIN_SHARED_ITEMS: usize = 10;
/// Only the strongest items go through the expensive AI stages.
const MAX_TOTAL_ITEMS: usize = 50;

/// Run the daily digest pipeline end to end. Returns `false` (exit 1 for
/// the caller) when any stage empties the pipeline before rendering.
pub async fn run_daily(config: &Config, publish: bool) -> Result<bool> {
    let start = std::time::Instant::now();
    let now = Utc::now();
    info!("daily digest pipeline starting");

    let client = build_client(config.request_timeout());
    let fetcher = Fetcher::new(client.clone(), config.request_delay());
    let gateway = LlmGateway::new(config);
    if !gateway.is_configured() {
        warn!("DEEPSEEK_API_KEY not set, summaries and translations will fall back");
    }

    // 1. Collect: shared data preferred, independent fetch as fallback
    let raw_items = collect_items(config, &fetcher, now).await;
    if raw_items.is_empty() {
        warn!("no items collected, stopping");
        return Ok(false);
    }

    // 2. Time filter (items without a timestamp pass through)
    let recent = filter_by_time(raw_items, now, config.pipeline.window_hours);
    if recent.is_empty() {
        warn!("nothing inside the time window, stopping");
        return Ok(false);
    }

    // 3. Relevance filter + score
    let scored = filter::filter_and_score(recent);
    if scored.is_empty() {
        warn!("no relevant items after keyword filter, stopping");
        return Ok(false);
    }

    // 4. Deduplicate
    let mut dedup = Deduplicator::new(
        config.pipeline.dedup_title_threshold,
        Some(config.newsroom.data_dir.join("news_cache.json")),
    );
    let unique = dedup.deduplicate(scored);
    if unique.is_empty() {
        warn!("nothing left after dedup, stopping");
        return Ok(false);
    }

    // 5. Top N by score
    let mut top: Vec<ScoredItem> = unique;
    if top.len() > MAX_TOTAL_ITEMS {
        info!(kept = MAX_TOTAL_ITEMS, total = top.len(), "taking top items by score");
        top.truncate(MAX_TOTAL_ITEMS);
    }
    for (i, item) in top.iter().take(10).enumerate() {
        info!(rank = i + 1, score = item.relevance_score, title = %clip(&item.raw.title, 60), "top item");
    }

    // 6. Enrich thin bodies
    let extractor = ContentExtractor::new(&fetcher, config.pipeline.max_content_length, config.request_delay());
    let mut raws: Vec<&mut RawItem> = top.iter_mut().map(|s| &mut s.raw).collect();
    extractor.enrich(&mut raws).await;

    // 7. Summarize, then drop invalid summaries
    let summarizer = Summarizer::new(&gateway, config.pipeline.summarize_batch_size);
    summarizer.summarize_all(&mut top).await;
    let mut top = summarize::filter_invalid(top);
    if top.is_empty() {
        warn!("all summaries invalid, stopping");
        return Ok(false);
    }

    // 8. Translate titles (Chinese titles pass through)
    translate_titles(config, &gateway, &mut top).await;

    // 9–10. Classify into the five buckets, trim each
    let mut buckets = if config.pipeline.classify_with_ai {
        classify::classify_batch_ai(&gateway, top).await
    } else {
        classify::classify_batch(top)
    };
    for items in buckets.values_mut() {
        items.truncate(config.pipeline.max_news_per_category);
    }
    let total: usize = buckets.values().map(|v| v.len()).sum();

    // 11. Lead paragraph
    let daily_summary = generate_daily_summary(&gateway, &buckets).await;

    // 12. Render
    let html = render::digest_html(&buckets, &daily_summary);
    render::save_digest_html(&config.newsroom.output_dir, &html, now)?;
    let markdown = render::digest_markdown(&buckets, &daily_summary, gateway.total_tokens(), now);
    render::save_digest_markdown(&config.newsroom.output_dir, &markdown, now)?;

    // 13. Publish
    if publish {
        let wechat = WeChatDraft::new(config, client);
        if wechat.is_configured() {
            let title = format!("AI资讯日报 {}", normalize::format_shanghai(now, "%Y年%-m月%-d日"));
            if !wechat.publish(&title, &html, "daily").await {
                warn!("wechat publish failed, digest kept locally");
            }
        } else {
            warn!("wechat credentials not set, skipping publish");
        }
    }

    for category in Category::ALL {
        let count = buckets.get(&category).map(|v| v.len()).unwrap_or(0);
        info!(category = category.display_name(), count, "section size");
    }
    info!(
        total,
        tokens = gateway.total_tokens(),
        elapsed_secs = start.elapsed().as_secs(),
        "daily digest complete"
    );

    Ok(true)
}

/// Shared feed first; when it comes back thin, fetch the sources directly.
async fn collect_items(config: &Config, fetcher: &Fetcher, now: DateTime<Utc>) -> Vec<RawItem> {
    let loader = SharedLoader::new(config.shared_data_dir());
    let mut items = loader.load(now, config.pipeline.window_hours);

    if items.len() < MIN_SHARED_ITEMS {
        info!(shared = items.len(), "shared data thin, fetching sources directly");
        let (fetched, statuses) = fetcher.fetch_all().await;
        let failed = statuses.iter().filter(|s| !s.ok).count();
        info!(fetched = fetched.len(), sources = statuses.len(), failed, "independent fetch done");
        items.extend(fetched);
    }

    info!(total = items.len(), "items collected");
    items
}

/// Keep items inside the trailing window; missing timestamps pass.
fn filter_by_time(items: Vec<RawItem>, now: DateTime<Utc>, hours: u32) -> Vec<RawItem> {
    let start = now - Duration::hours(hours as i64);
    let before = items.len();
    let mut no_time = 0usize;
    let kept: Vec<RawItem> = items
        .into_iter()
        .filter(|item| match item.pub_time {
            Some(t) => t >= start && t <= now + Duration::hours(1),
            None => {
                no_time += 1;
                true
            }
        })
        .collect();
    info!(before, after = kept.len(), no_time, hours, "time filter applied");
    kept
}

/// Batched free-tier translation with LLM fallback; untranslatable titles
/// keep their original text.
async fn translate_titles(config: &Config, gateway: &LlmGateway, items: &mut [ScoredItem]) {
    let cache = TranslationCache::load(Some(config.newsroom.data_dir.join("title-zh-cache.json")));
    let mut translator = Translator::new(
        gateway,
        config.translate_free_timeout(),
        config.pipeline.translate_batch_size,
        cache,
    );

    let titles: Vec<String> = items.iter().map(|i| i.raw.title.clone()).collect();
    let translated = translator.translate_titles(&titles).await;

    let mut translated_count = 0usize;
    for (item, zh) in items.iter_mut().zip(translated) {
        match zh {
            Some(zh) => {
                item.title_cn = zh;
                translated_count += 1;
            }
            None => item.title_cn = item.raw.title.clone(),
        }
    }
    info!(translated = translated_count, total = items.len(), "titles translated");
}

/// 50–80 character lead paragraph from the strongest titles, with a
/// deterministic fallback when the model is unavailable.
async fn generate_daily_summary(gateway: &LlmGateway, buckets: &HashMap<Category, Vec<ScoredItem>>) -> String {
    let mut titles: Vec<String> = Vec::new();
    for category in Category::ALL {
        if let Some(items) = buckets.get(&category) {
            for item in items.iter().take(2) {
                titles.push(clip(item.display_title(), 50));
            }
        }
    }
    let total: usize = buckets.values().map(|v| v.len()).sum();
    if titles.is_empty() {
        return "今日AI行业暂无重大动态更新。".to_string();
    }
    titles.truncate(8);

    let prompt = format!(
        "请根据以下今日AI资讯标题，生成一段50-80字的每日导语摘要，概括今日AI领域的主要动态：\n\n{}\n\n\
         要求：\n1. 简洁概括今日主要动态\n2. 突出重点公司和技术\n3. 语言流畅，适合作为日报开头\n4. 直接输出导语内容，不要加任何前缀",
        titles.iter().map(|t| format!("- {t}")).collect::<Vec<_>>().join("\n")
    );
    let messages = [
        ChatMessage::system("你是一位专业的科技新闻编辑。"),
        ChatMessage::user(prompt),
    ];

    match gateway.chat(&messages, 0.5, 200).await {
        Some(response) => response.trim().trim_matches(['"', '\'']).to_string(),
        None => format!("今日AI领域共有{total}条动态值得关注。"),
    }
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, SourceType};
    use chrono::TimeZone;

    fn item(pub_time: Option<DateTime<Utc>>) -> RawItem {
        RawItem {
            id: "x".to_string(),
            title: "t".to_string(),
            url: "https://example.com/x".to_string(),
            source_key: "k".to_string(),
            source_name: "n".to_string(),
            source_type: SourceType::EnMedia,
            language: Language::En,
            pub_time,
            summary: String::new(),
            content: String::new(),
        }
    }

    #[test]
    fn window_includes_25h_old_item() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 9, 11, 0, 0).unwrap();
        let kept = filter_by_time(vec![item(Some(t))], now, 28);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn window_drops_30h_old_item() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 9, 6, 0, 0).unwrap();
        let kept = filter_by_time(vec![item(Some(t))], now, 28);
        assert!(kept.is_empty());
    }

    #[test]
    fn missing_pub_time_passes_through() {
        let now = Utc::now();
        let kept = filter_by_time(vec![item(None)], now, 28);
        assert_eq!(kept.len(), 1);
    }
}
