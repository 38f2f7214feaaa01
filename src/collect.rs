use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, ArchiveStore, IncomingRecord};
use crate::config::Config;
use crate::fetch::{Fetcher, build_client};
use crate::llm::LlmGateway;
use crate::models::ArchiveRecord;
use crate::normalize;
use crate::publish::{FeishuBitable, WeComWebhook};
use crate::translate::{TranslationCache, Translator};

/// The shared snapshot covers a straight 24 hours; skew tolerance is the
/// daily pipeline's concern.
const WINDOW_HOURS: u32 = 24;
/// New EN→ZH title translations per run are capped to bound cost.
const MAX_NEW_TRANSLATIONS: usize = 80;
/// Items pushed to the group bot.
const TOP_N: usize = 20;

/// Hourly collection run: fetch everything, fold into the archive, prune,
/// write the shared JSON files, push the top picks, sync Feishu.
pub async fn run_collect(config: &Config, push: bool) -> Result<bool> {
    let now = Utc::now();
    let data_dir = &config.newsroom.data_dir;
    info!("collect run starting");

    let mut store = ArchiveStore::load(data_dir.join("archive.json"));
    if store.is_empty() {
        info!("starting with an empty archive");
    }

    let client = build_client(config.request_timeout());
    let fetcher = Fetcher::new(client.clone(), config.request_delay());
    let (raw_items, statuses) = fetcher.fetch_all().await;
    info!(items = raw_items.len(), sources = statuses.len(), "collection done");

    for item in &raw_items {
        store.upsert(&IncomingRecord::from_raw(item), now);
    }
    store.prune(now, config.pipeline.archive_retain_days);

    // Window snapshot, AI split
    let items_all = store.window_records(now, WINDOW_HOURS);
    let mut items_ai: Vec<ArchiveRecord> = items_all.iter().filter(|r| archive::is_ai_related(r)).cloned().collect();
    info!(all = items_all.len(), ai = items_ai.len(), "24h window built");

    // Bilingual titles for the AI picks
    let gateway = LlmGateway::new(config);
    let cache = TranslationCache::load(Some(data_dir.join("title-zh-cache.json")));
    let mut translator = Translator::new(
        &gateway,
        config.translate_free_timeout(),
        config.pipeline.translate_batch_size,
        cache,
    );
    add_bilingual_titles(&mut translator, &mut store, &mut items_ai).await;

    let items_ai_dedup = archive::dedupe_by_title_url(&items_ai);
    let items_all_dedup = archive::dedupe_by_title_url(&items_all);

    // Shared files
    let latest = archive::build_latest_payload(
        now,
        WINDOW_HOURS,
        &items_ai_dedup,
        &items_ai,
        &items_all,
        &items_all_dedup,
        store.len(),
    );
    archive::write_json_atomic(&data_dir.join("latest-24h.json"), &latest).context("writing latest-24h.json")?;

    store.save(now).context("writing archive.json")?;

    let status = archive::build_status_payload(now, &statuses, raw_items.len(), items_ai_dedup.len());
    archive::write_json_atomic(&data_dir.join("source-status.json"), &status).context("writing source-status.json")?;

    // Push the strongest items to the group bot
    if push {
        let top = select_top_items(&items_ai_dedup, TOP_N);
        let wecom = WeComWebhook::new(config, client.clone());
        if wecom.is_configured() && !top.is_empty() {
            wecom.send_markdown(&format_news_markdown(&top)).await;
        } else if top.is_empty() {
            info!("nothing to push");
        }
    }

    // Incremental Feishu sync
    let feishu = FeishuBitable::new(config, client);
    if let Err(e) = feishu.sync_items(&items_ai_dedup, &data_dir.join("feishu_written_ids.json")).await {
        warn!(error = %e, "feishu sync failed");
    }

    info!(archive = store.len(), window = items_ai_dedup.len(), "collect run complete");
    Ok(!items_all.is_empty())
}

/// Fill title_zh on records that lack one, free tier first, capped per
/// run. Translations are mirrored back into the archive.
async fn add_bilingual_titles(translator: &mut Translator<'_>, store: &mut ArchiveStore, items: &mut [ArchiveRecord]) {
    let mut new_translations = 0usize;
    for record in items.iter_mut() {
        if record.title_zh.as_ref().is_some_and(|t| !t.is_empty()) {
            continue;
        }
        if !crate::translate::needs_translation(&record.title) {
            record.title_zh = Some(record.title.clone());
            continue;
        }
        if new_translations >= MAX_NEW_TRANSLATIONS {
            continue;
        }
        if let Some(zh) = translator.translate_title(&record.title).await {
            record.title_en = Some(record.title.clone());
            record.title_zh = Some(zh.clone());
            store.set_title_zh(&record.id, zh);
            new_translations += 1;
        }
    }
    info!(new_translations, "bilingual titles filled");
}

/// Round-robin across sites so one site cannot dominate the push.
pub fn select_top_items(items: &[ArchiveRecord], top_n: usize) -> Vec<ArchiveRecord> {
    if items.len() <= top_n {
        return items.to_vec();
    }

    let mut by_site: Vec<(String, std::collections::VecDeque<&ArchiveRecord>)> = Vec::new();
    for item in items {
        match by_site.iter_mut().find(|(sid, _)| *sid == item.site_id) {
            Some((_, queue)) => queue.push_back(item),
            None => {
                let mut queue = std::collections::VecDeque::new();
                queue.push_back(item);
                by_site.push((item.site_id.clone(), queue));
            }
        }
    }

    let mut selected: Vec<ArchiveRecord> = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();
    while selected.len() < top_n {
        let mut progressed = false;
        for (_, queue) in by_site.iter_mut() {
            if selected.len() >= top_n {
                break;
            }
            if let Some(item) = queue.pop_front() {
                progressed = true;
                if seen_urls.insert(item.url.clone()) {
                    selected.push(item.clone());
                }
            }
        }
        if !progressed {
            break;
        }
    }
    selected
}

/// WeCom markdown body for the hourly push.
pub fn format_news_markdown(items: &[ArchiveRecord]) -> String {
    let time_str = normalize::format_shanghai(Utc::now(), "%m月%d日 %H:%M");
    let mut lines = vec![format!("## AI 热讯 | {time_str}\n")];

    for (i, item) in items.iter().enumerate() {
        let display_title = item
            .title_zh
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| item.title.clone());
        let display_title = if display_title.chars().count() > 60 {
            display_title.chars().take(57).collect::<String>() + "..."
        } else {
            display_title
        };

        lines.push(format!("**{}.** [{display_title}]({})", i + 1, item.url));
        let mut source_tag = if item.site_name.is_empty() {
            String::new()
        } else {
            format!("`{}`", item.site_name)
        };
        if !item.source.is_empty() && item.source != item.site_name {
            source_tag = format!("{source_tag} {}", item.source);
        }
        if source_tag.trim().is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("> {}\n", source_tag.trim()));
        }
    }

    lines.push(format!("\n---\n> 数据更新: {time_str} | 共 {} 条", items.len()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn record(site_id: &str, n: usize) -> ArchiveRecord {
        let ts: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        ArchiveRecord {
            id: format!("{site_id}-{n}"),
            site_id: site_id.to_string(),
            site_name: site_id.to_string(),
            source: String::new(),
            title: format!("Story {n} from {site_id}"),
            url: format!("https://{site_id}.example.com/{n}"),
            published_at: None,
            first_seen_at: ts,
            last_seen_at: ts,
            title_zh: None,
            title_en: None,
        }
    }

    #[test]
    fn small_lists_are_returned_whole() {
        let items = vec![record("a", 1), record("b", 2)];
        assert_eq!(select_top_items(&items, 20).len(), 2);
    }

    #[test]
    fn selection_round_robins_across_sites() {
        let mut items = Vec::new();
        for n in 0..10 {
            items.push(record("big", n));
        }
        items.push(record("small", 100));

        let selected = select_top_items(&items, 4);
        assert_eq!(selected.len(), 4);
        // The small site gets a slot in round one despite position 11
        assert!(selected.iter().any(|i| i.site_id == "small"));
    }

    #[test]
    fn markdown_push_prefers_chinese_title() {
        let mut item = record("techmeme", 1);
        item.title_zh = Some("中文标题".to_string());
        let md = format_news_markdown(&[item]);
        assert!(md.contains("[中文标题]"));
        assert!(md.contains("共 1 条"));
    }
}
