use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{Category, ScoredItem};
use crate::normalize;

const SECTION_TITLES: [(Category, &str); 5] = [
    (Category::BigTech, "01 大厂动态"),
    (Category::AiProducts, "02 应用与产品"),
    (Category::AiTech, "03 模型与技术"),
    (Category::AiGaming, "04 AI与游戏"),
    (Category::IndustryNews, "05 行业新闻"),
];

/// WeChat-compatible digest HTML: everything inline-styled, no classes.
pub fn digest_html(buckets: &HashMap<Category, Vec<ScoredItem>>, daily_summary: &str) -> String {
    let mut parts = Vec::new();
    parts.push(
        r#"<div style="max-width:100%;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,'Helvetica Neue',Arial,sans-serif;">"#
            .to_string(),
    );
    parts.push(format!(
        "<div style=\"padding:12px 0;margin:16px 0;color:#7a4fd6;font-size:16px;font-weight:bold;line-height:1.6;\">\n{}\n</div>",
        escape_html(daily_summary)
    ));

    for (category, section_title) in SECTION_TITLES {
        let Some(items) = buckets.get(&category).filter(|v| !v.is_empty()) else {
            continue;
        };
        parts.push("<p style=\"margin:0;\">&nbsp;</p>".to_string());
        parts.push(format!(
            "<p style=\"color:#000000;font-weight:bold;font-size:24px;font-style:italic;margin:0 0 16px 0;\">{section_title}</p>"
        ));

        for (i, item) in items.iter().enumerate() {
            let title = escape_html(item.display_title());
            let summary = escape_html(item.display_summary());
            let url = escape_html(&item.raw.url);
            let source = escape_html(&item.raw.source_name);
            parts.push(format!(
                "<div style=\"margin-bottom:20px;\">\n\
                 <p style=\"color:#7a4fd6;font-weight:bold;font-size:18px;margin:0 0 12px 0;line-height:1.5;\">{}. {title}</p>\n\
                 <p style=\"color:#000000;font-size:16px;line-height:1.7;margin:0 0 10px 0;text-align:justify;\">{summary}</p>\n\
                 <p style=\"color:#d6d6d6;font-size:14px;font-weight:bold;margin:0 0 6px 0;\">来源: {source}</p>\n\
                 <p style=\"font-size:14px;font-weight:bold;margin:0;word-break:break-all;\"><a href=\"{url}\" style=\"color:#d6d6d6;text-decoration:none;\">{url}</a></p>\n\
                 </div>",
                i + 1
            ));
        }
    }

    parts.push("</div>".to_string());
    parts.join("\n")
}

/// Full Markdown digest, mirroring the HTML sections.
pub fn digest_markdown(
    buckets: &HashMap<Category, Vec<ScoredItem>>,
    daily_summary: &str,
    token_usage: u64,
    now: DateTime<Utc>,
) -> String {
    let date_str = normalize::format_shanghai(now, "%Y-%m-%d");
    let mut lines = vec![format!("# AI资讯日报-{date_str}"), String::new()];

    lines.push("## AI导语".to_string());
    lines.push(String::new());
    if daily_summary.is_empty() {
        let total: usize = buckets.values().map(|v| v.len()).sum();
        lines.push(format!("今日AI领域共有{total}条动态值得关注。"));
    } else {
        lines.push(daily_summary.to_string());
    }
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    for (category, section_title) in SECTION_TITLES {
        lines.push(String::new());
        lines.push(format!("## {section_title}"));
        lines.push(String::new());

        match buckets.get(&category).filter(|v| !v.is_empty()) {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    lines.push(format!("### {}. {}", i + 1, item.display_title()));
                    lines.push(String::new());
                    let summary = item.display_summary();
                    if !summary.is_empty() {
                        lines.push(summary.to_string());
                        lines.push(String::new());
                    }
                    lines.push(format!("来源: {}", item.raw.source_name));
                    lines.push(String::new());
                    lines.push(item.raw.url.clone());
                    lines.push(String::new());
                }
            }
            None => {
                lines.push("暂无新闻".to_string());
                lines.push(String::new());
            }
        }
    }

    if token_usage > 0 {
        lines.push(format!("*本日报由AI自动生成 · Token消耗: {token_usage}*"));
    } else {
        lines.push("*本日报由AI自动生成*".to_string());
    }

    lines.join("\n")
}

/// Deep-column article HTML: markdown body converted and wrapped in the
/// WeChat inline-styled shell with a stats line.
pub fn column_html(title: &str, body_markdown: &str, article_count: usize, source_count: usize, now: DateTime<Utc>) -> String {
    let body_html = markdown_to_html(body_markdown);
    let body_html = inline_style_tags(&body_html);
    let date_str = normalize::format_shanghai(now, "%Y年%m月%d日");

    format!(
        r#"<div style="max-width:100%;margin:0 auto;padding:15px;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI','PingFang SC','Hiragino Sans GB','Microsoft YaHei',sans-serif;color:#333;line-height:1.8;font-size:15px;">

  <div style="text-align:center;margin-bottom:25px;">
    <h1 style="font-size:22px;font-weight:bold;color:#1a1a1a;margin:0 0 10px 0;line-height:1.4;">{title}</h1>
    <p style="font-size:12px;color:#999;margin:0;">AI深度专栏 | {date_str}</p>
    <p style="font-size:12px;color:#999;margin:0 0 15px 0;">📊 综合 {source_count} 个来源 {article_count} 篇报道</p>
  </div>

  <div style="border-top:2px solid #7a4fd6;margin:0 0 20px 0;"></div>

  <div style="font-size:15px;color:#333;line-height:1.9;">
    {body_html}
  </div>

  <div style="border-top:1px solid #eee;margin-top:30px;padding-top:15px;text-align:center;">
    <p style="font-size:12px;color:#999;margin:0;">本文由 AI 基于多源新闻素材自动生成，仅供参考</p>
    <p style="font-size:12px;color:#999;margin:5px 0 0 0;">AI深度专栏 · 每日热点深度解读</p>
  </div>

</div>"#,
        title = escape_html(title),
    )
}

fn markdown_to_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// WeChat strips stylesheets, so block tags get their styles inlined.
fn inline_style_tags(html: &str) -> String {
    html.replace(
        "<h2>",
        r#"<h2 style="font-size:18px;font-weight:bold;color:#1a1a1a;margin:25px 0 12px 0;padding-left:10px;border-left:4px solid #7a4fd6;">"#,
    )
    .replace(
        "<h3>",
        r#"<h3 style="font-size:16px;font-weight:bold;color:#333;margin:20px 0 10px 0;">"#,
    )
    .replace("<p>", r#"<p style="margin:0 0 15px 0;text-align:justify;">"#)
    .replace("<ul>", r#"<ul style="margin:0 0 15px 0;padding-left:20px;">"#)
    .replace("<li>", r#"<li style="margin:0 0 8px 0;">"#)
    .replace(
        "<blockquote>",
        r#"<blockquote style="margin:0 0 15px 0;padding:10px 15px;background:#f7f5fb;border-left:3px solid #7a4fd6;color:#555;">"#,
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Write the digest HTML to the output dir as a standalone page.
pub fn save_digest_html(output_dir: &Path, html_body: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;
    let date_str = normalize::report_date(now);
    let path = output_dir.join(format!("AI资讯日报_{date_str}.html"));
    let full = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"utf-8\">\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    <title>AI资讯日报_{date_str}</title>\n</head>\n<body>\n{html_body}\n</body>\n</html>"
    );
    std::fs::write(&path, full).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "digest HTML saved");
    Ok(path)
}

/// Write the Markdown digest with a time-stamped filename.
pub fn save_digest_markdown(output_dir: &Path, markdown: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;
    let filename = format!(
        "report_{}_{}.md",
        normalize::format_shanghai(now, "%Y-%m-%d"),
        normalize::format_shanghai(now, "%H%M%S")
    );
    let path = output_dir.join(filename);
    std::fs::write(&path, markdown).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "digest markdown saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, RawItem, SourceType};

    fn bucket_with(category: Category, titles: &[&str]) -> HashMap<Category, Vec<ScoredItem>> {
        let mut buckets: HashMap<Category, Vec<ScoredItem>> = HashMap::new();
        let items = titles
            .iter()
            .map(|t| {
                let mut item = ScoredItem::new(
                    RawItem {
                        id: t.to_string(),
                        title: t.to_string(),
                        url: format!("https://example.com/{}", t.len()),
                        source_key: "techmeme".to_string(),
                        source_name: "Techmeme".to_string(),
                        source_type: SourceType::EnMedia,
                        language: Language::En,
                        pub_time: None,
                        summary: "summary".to_string(),
                        content: String::new(),
                    },
                    1.0,
                    Vec::new(),
                    false,
                );
                item.summary_cn = format!("{t} 的摘要");
                item
            })
            .collect();
        buckets.insert(category, items);
        buckets
    }

    #[test]
    fn html_contains_sections_and_items() {
        let buckets = bucket_with(Category::BigTech, &["OpenAI news"]);
        let html = digest_html(&buckets, "今日导语");
        assert!(html.contains("01 大厂动态"));
        assert!(html.contains("1. OpenAI news"));
        assert!(html.contains("今日导语"));
        // Empty sections are omitted from HTML
        assert!(!html.contains("05 行业新闻"));
    }

    #[test]
    fn markdown_lists_every_section() {
        let buckets = bucket_with(Category::AiTech, &["Model release"]);
        let md = digest_markdown(&buckets, "导语", 1234, Utc::now());
        for (_, title) in SECTION_TITLES {
            assert!(md.contains(title), "missing section {title}");
        }
        assert!(md.contains("暂无新闻"));
        assert!(md.contains("Token消耗: 1234"));
    }

    #[test]
    fn html_escapes_item_fields() {
        let buckets = bucket_with(Category::BigTech, &["<script>alert(1)</script>"]);
        let html = digest_html(&buckets, "导语");
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn column_html_wraps_markdown() {
        let html = column_html("专栏标题", "## 背景\n\n正文段落。", 5, 3, Utc::now());
        assert!(html.contains("专栏标题"));
        assert!(html.contains("border-left:4px solid #7a4fd6"));
        assert!(html.contains("综合 3 个来源 5 篇报道"));
        assert!(html.contains("正文段落。"));
    }
}
