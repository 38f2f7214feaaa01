use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::archive;
use crate::cluster::{self, ClustererConfig};
use crate::config::Config;
use crate::fetch::{Fetcher, build_client};
use crate::llm::{ChatMessage, LlmGateway};
use crate::models::{TopicCandidate, TopicCluster};
use crate::normalize;
use crate::publish::{WeChatDraft, WeComWebhook};
use crate::render;
use crate::shared::SharedLoader;

/// Excerpts are fetched for this many leading cluster members.
const EXCERPT_FETCH_COUNT: usize = 3;
/// Materials include at most this many member articles.
const MAX_MATERIAL_ARTICLES: usize = 8;
const EXCERPT_MAX_CHARS: usize = 500;

/// Discover mode: load news, cluster, persist candidates, notify.
pub async fn discover(config: &Config) -> Result<bool> {
    info!("scanning for hot topics");
    let clusters = build_clusters(config);
    if clusters.is_empty() {
        warn!("no cluster reached the hotness bar");
        return Ok(false);
    }

    let candidates = cluster::candidates(&clusters);
    info!(count = candidates.len(), "candidate topics found");

    let path = config.newsroom.data_dir.join("candidates.json");
    archive::write_json_atomic(&path, &serde_json::to_value(&candidates)?).context("saving candidates")?;
    info!(path = %path.display(), "candidates saved");

    let client = build_client(config.request_timeout());
    let wecom = WeComWebhook::new(config, client);
    if wecom.is_configured() {
        wecom.send_markdown(&format_candidates_markdown(&candidates)).await;
    } else {
        print_candidates(&candidates);
    }

    Ok(true)
}

/// Generate mode: resolve the chosen cluster (re-clustering if needed),
/// collect materials, write the article, render and publish.
pub async fn generate(config: &Config, topic_id: usize) -> Result<bool> {
    let candidates = load_candidates(config);
    if candidates.is_empty() {
        warn!("no saved candidates, run discover first");
        return Ok(false);
    }
    if topic_id >= candidates.len() {
        warn!(topic = topic_id + 1, available = candidates.len(), "topic number out of range");
        return Ok(false);
    }

    // Cluster state does not survive between invocations; rebuild it.
    let clusters = build_clusters(config);
    let Some(cluster) = clusters.get(topic_id) else {
        warn!("re-clustering no longer yields this topic");
        return Ok(false);
    };

    info!(
        topic = %cluster.representative_title,
        articles = cluster.count(),
        "generating column"
    );

    let client = build_client(config.request_timeout());
    let fetcher = Fetcher::new(client.clone(), config.request_delay());
    let materials = collect_materials(&fetcher, cluster).await;
    info!(chars = materials.chars().count(), "materials assembled");

    let gateway = LlmGateway::new(config);
    let Some((title, body)) = write_article(&gateway, &cluster.representative_title, &materials).await else {
        warn!("article generation failed");
        return Ok(false);
    };
    info!(title = %title, chars = body.chars().count(), "article written");

    let html = render::column_html(&title, &body, cluster.count(), cluster.source_count(), Utc::now());

    let wechat = WeChatDraft::new(config, client);
    if !wechat.is_configured() {
        warn!("wechat credentials not set, keeping column local");
        let path = config.newsroom.output_dir.join(format!(
            "column_{}.html",
            normalize::format_shanghai(Utc::now(), "%Y-%m-%d_%H%M%S")
        ));
        std::fs::create_dir_all(&config.newsroom.output_dir)?;
        std::fs::write(&path, &html).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "column saved locally");
        return Ok(true);
    }

    let wechat_title = format!("AI专栏 | {title}");
    let published = wechat.publish(&wechat_title, &html, "column").await;
    if published {
        info!(tokens = gateway.total_tokens(), "column published");
    }
    Ok(published)
}

/// Auto mode: discover, then generate the hottest candidate.
pub async fn auto(config: &Config) -> Result<bool> {
    if !discover(config).await? {
        return Ok(false);
    }
    generate(config, 0).await
}

/// Load the clustering input and run the clusterer. Prefers the shared
/// pre-filtered feed; the loader falls back to the full archive.
fn build_clusters(config: &Config) -> Vec<TopicCluster> {
    let loader = SharedLoader::new(config.shared_data_dir());
    let items = loader.load_news_items(Utc::now(), config.pipeline.cluster_time_window_hours);
    if items.is_empty() {
        return Vec::new();
    }
    info!(items = items.len(), "news loaded for clustering");

    cluster::cluster(
        items,
        &ClustererConfig {
            similarity_threshold: config.pipeline.cluster_similarity_threshold,
            min_articles: config.pipeline.cluster_min_articles,
            max_candidates: config.pipeline.max_candidate_topics,
        },
    )
}

fn load_candidates(config: &Config) -> Vec<TopicCandidate> {
    let path = config.newsroom.data_dir.join("candidates.json");
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}

/// Assemble the writing context: member titles, with fetched excerpts for
/// the leading few.
pub async fn collect_materials(fetcher: &Fetcher, cluster: &TopicCluster) -> String {
    let mut sections = Vec::new();

    for (i, article) in cluster.articles.iter().take(MAX_MATERIAL_ARTICLES).enumerate() {
        let title = article.title_zh.as_deref().filter(|t| !t.is_empty()).unwrap_or(&article.title);
        let source = if article.source.is_empty() { &article.site_id } else { &article.source };

        let mut entry = format!("### 报道 {}（来源: {source}）\n标题: {title}", i + 1);
        if i < EXCERPT_FETCH_COUNT
            && let Some(excerpt) = fetch_excerpt(fetcher, &article.url).await
        {
            entry.push_str(&format!("\n摘要: {excerpt}"));
        }
        sections.push(entry);
    }

    format!(
        "话题: {}\n报道数量: {} 篇，涉及 {} 个来源\n\n{}",
        cluster.representative_title,
        cluster.count(),
        cluster.source_count(),
        sections.join("\n\n")
    )
}

/// Best-effort page excerpt: meta description, og:description, then the
/// first meaningful body text.
async fn fetch_excerpt(fetcher: &Fetcher, url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    let html = match fetcher.get_text(url).await {
        Ok(html) => html,
        Err(e) => {
            debug!(url = %url, error = %e, "excerpt fetch failed");
            return None;
        }
    };
    extract_excerpt(&html)
}

pub fn extract_excerpt(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    for css in [
        r#"meta[name="description"]"#,
        r#"meta[property="og:description"]"#,
    ] {
        if let Ok(sel) = Selector::parse(css)
            && let Some(el) = doc.select(&sel).next()
            && let Some(content) = el.value().attr("content")
        {
            let content = content.trim();
            if content.chars().count() > 30 {
                return Some(content.chars().take(EXCERPT_MAX_CHARS).collect());
            }
        }
    }

    // Fallback: strip tags and take the leading text
    static TAG_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static SCRIPT_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let script_re =
        SCRIPT_RE.get_or_init(|| Regex::new(r"(?si)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"));

    let text = script_re.replace_all(html, "");
    let text = tag_re.replace_all(&text, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > 100 {
        Some(text.chars().take(EXCERPT_MAX_CHARS).collect())
    } else {
        None
    }
}

const ARTICLE_SYSTEM: &str = "你是一位资深科技专栏作者，擅长把多源新闻素材写成有观点、有结构的深度解读。\
    文章使用 Markdown 格式，用 ## 和 ### 组织章节，语言流畅专业，不堆砌术语。";

/// Ask the model for a long-form column; parse out the title line.
async fn write_article(gateway: &LlmGateway, topic_title: &str, materials: &str) -> Option<(String, String)> {
    let prompt = format!(
        "请基于以下素材，撰写一篇 800-1500 字的中文深度专栏文章。\n\n\
         要求：\n\
         1. 第一行输出 TITLE: 文章标题（15-30字，不加书名号）\n\
         2. 正文使用 Markdown，分 2-4 个章节（## 标题），可用 ### 细分\n\
         3. 综合各来源信息，交代事件背景、关键事实与影响，观点明确\n\
         4. 保留公司名与产品名原文，不虚构素材之外的事实\n\n\
         素材：\n{materials}\n\n话题：{topic_title}"
    );
    let messages = [ChatMessage::system(ARTICLE_SYSTEM), ChatMessage::user(prompt)];

    let response = gateway.chat(&messages, 0.6, 4000).await?;
    let (title, body) = parse_article(&response);
    if body.trim().is_empty() {
        return None;
    }
    Some((title, body))
}

/// Pull the title out of a `TITLE:` line, a leading `#` heading, or fall
/// back to a constant.
pub fn parse_article(raw: &str) -> (String, String) {
    let mut title: Option<String> = None;
    let mut body_lines: Vec<&str> = Vec::new();

    for line in raw.trim().lines() {
        let stripped = line.trim();
        if title.is_none() && stripped.to_uppercase().starts_with("TITLE:") {
            title = Some(stripped[6..].trim().trim_matches(['《', '》', '「', '」', '【', '】']).to_string());
            continue;
        }
        if body_lines.is_empty() && (stripped == "---" || stripped.is_empty()) {
            continue;
        }
        body_lines.push(line);
    }

    let mut body = body_lines.join("\n").trim().to_string();

    if title.is_none()
        && let Some(heading) = body.lines().find(|l| l.trim().starts_with("# ")).map(|l| l.to_string())
    {
        let text = heading.trim().trim_start_matches('#').trim().to_string();
        body = body.replacen(&heading, "", 1).trim().to_string();
        title = Some(text);
    }

    let title = title.filter(|t| !t.is_empty()).unwrap_or_else(|| "AI深度专栏".to_string());
    (title, body)
}

fn format_candidates_markdown(candidates: &[TopicCandidate]) -> String {
    let date_str = normalize::report_date(Utc::now());
    let mut lines = vec![
        format!("## 📊 AI专栏候选话题 ({date_str})"),
        String::new(),
        "回复话题编号生成专栏，回复 0 跳过。".to_string(),
        String::new(),
    ];

    for c in candidates {
        let sample = c.sample_titles.first().map(|t| clip(t, 40)).unwrap_or_default();
        lines.push(format!(
            "**{}. {}**\n   > {}篇报道 · {}个来源\n   > 样例: {sample}",
            c.topic_id + 1,
            clip(&c.title, 50),
            c.article_count,
            c.source_count,
        ));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn print_candidates(candidates: &[TopicCandidate]) {
    println!("\n{}", "=".repeat(60));
    println!("📊 AI专栏候选话题 ({})", normalize::report_date(Utc::now()));
    println!("{}", "=".repeat(60));
    for c in candidates {
        println!("\n  {}. 【{}】", c.topic_id + 1, c.title);
        println!("     📰 {}篇报道 · {}个来源", c.article_count, c.source_count);
        for sample in c.sample_titles.iter().take(3) {
            println!("     - {}", clip(sample, 60));
        }
    }
    println!("\n{}", "=".repeat(60));
    println!("输入话题编号选择（如 1），输入 0 跳过");
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "..."
    }
}
