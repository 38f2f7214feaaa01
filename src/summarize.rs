use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, LlmGateway};
use crate::models::{Language, ScoredItem};

/// Per-item content cap inside a batched prompt.
const MAX_CONTENT_PER_ITEM: usize = 600;
/// Whole-batch cap; beyond this the batch falls back to per-item calls.
const MAX_TOTAL_CHARS: usize = 2500;
/// Longer cap for single-item prompts.
const MAX_SINGLE_CONTENT: usize = 1200;

/// Summaries where the model reported missing input rather than
/// summarizing. Items with these are dropped from the digest.
const INVALID_SUMMARY_KEYWORDS: &[&str] = &[
    "正文内容为空",
    "正文内容缺失",
    "正文缺失",
    "内容为空",
    "内容缺失",
    "无法生成有效摘要",
    "无法生成摘要",
    "未能获取",
    "无法获取",
    "没有提供正文",
    "缺少正文",
    "正文为空",
    "无正文",
    "无法提取",
    "content is empty",
    "no content",
    "content missing",
];

pub struct Summarizer<'a> {
    gateway: &'a LlmGateway,
    batch_size: usize,
}

impl<'a> Summarizer<'a> {
    pub fn new(gateway: &'a LlmGateway, batch_size: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
        }
    }

    /// Fill `summary_cn` on every item: batched calls first, per-item
    /// fallback, and the feed summary as the last resort.
    pub async fn summarize_all(&self, items: &mut [ScoredItem]) {
        info!(count = items.len(), "generating summaries");

        let mut start = 0;
        while start < items.len() {
            let end = (start + self.batch_size).min(items.len());
            let batch = &mut items[start..end];

            if batch.len() > 1
                && let Some(summaries) = self.summarize_batch(batch).await
            {
                for (item, summary) in batch.iter_mut().zip(summaries) {
                    item.summary_cn = summary.trim().to_string();
                    debug!(title = %truncate_chars(&item.raw.title, 30), "batch summary done");
                }
                start = end;
                continue;
            }

            for item in batch.iter_mut() {
                if !item.summary_cn.is_empty() {
                    continue;
                }
                if let Some(summary) = self.summarize_single(item).await {
                    item.summary_cn = summary;
                }
            }
            start = end;
        }

        let mut missing = 0;
        for item in items.iter_mut() {
            if item.summary_cn.is_empty() {
                item.summary_cn = item.raw.summary.clone();
                missing += 1;
            }
        }
        if missing > 0 {
            warn!(missing, "items left without an AI summary");
        }

        info!(tokens = self.gateway.total_tokens(), "summaries complete");
    }

    /// One API call for a whole batch; returns `None` on oversized input,
    /// unparseable output, or length mismatch.
    async fn summarize_batch(&self, batch: &[ScoredItem]) -> Option<Vec<String>> {
        let mut entries = Vec::with_capacity(batch.len());
        let mut total_chars = 0;
        for (i, item) in batch.iter().enumerate() {
            let content = pick_content(item);
            let content = truncate_chars(&content, MAX_CONTENT_PER_ITEM);
            let lang = match item.raw.language {
                Language::En => "英文",
                Language::Zh => "中文",
            };
            let entry = format!("【新闻{}】({lang})\n标题: {}\n正文: {content}", i + 1, item.raw.title);
            total_chars += entry.chars().count();
            if total_chars > MAX_TOTAL_CHARS {
                warn!(total_chars, "batch input too long, falling back to per-item");
                return None;
            }
            entries.push(entry);
        }

        let prompt = format!(
            "为以下{}条新闻各生成50-80字中文摘要，英文新闻先翻译再总结，正文不足时根据标题推断，按JSON数组输出[\"摘要1\",\"摘要2\"]，只输出数组：\n\n{}",
            batch.len(),
            entries.join("\n")
        );
        let messages = [
            ChatMessage::system("你是科技新闻编辑，按JSON数组格式输出摘要。"),
            ChatMessage::user(prompt),
        ];

        let response = self.gateway.chat(&messages, 0.3, 1500).await?;
        let summaries = parse_summary_array(&response)?;
        if summaries.len() == batch.len() {
            Some(summaries)
        } else {
            warn!(expected = batch.len(), got = summaries.len(), "batch summary count mismatch");
            None
        }
    }

    async fn summarize_single(&self, item: &ScoredItem) -> Option<String> {
        let mut content = pick_content(item);
        if content.is_empty() {
            // Even without a body, the title carries enough for one line
            content = item.raw.title.clone();
        }
        let content = truncate_chars(&content, MAX_SINGLE_CONTENT);

        let prompt = match item.raw.language {
            Language::Zh => format!(
                "为以下新闻生成100-150字中文摘要，提取核心事件，保持客观，保留公司名原名，正文不足时根据标题推断，直接输出摘要：\n\n标题：{}\n正文：{content}",
                item.raw.title
            ),
            Language::En => format!(
                "将以下英文新闻翻译并总结成100-150字中文摘要，提取核心事件，保持客观，保留公司名原名，正文不足时根据标题推断，直接输出摘要：\n\nTitle: {}\nContent: {content}",
                item.raw.title
            ),
        };
        let messages = [
            ChatMessage::system("你是科技新闻编辑，生成简洁中文摘要。"),
            ChatMessage::user(prompt),
        ];

        let response = self.gateway.chat(&messages, 0.3, 500).await?;
        Some(response.trim().trim_matches(['"', '\'']).to_string())
    }
}

fn pick_content(item: &ScoredItem) -> String {
    if !item.raw.content.is_empty() {
        item.raw.content.clone()
    } else {
        item.raw.summary.clone()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// True when the model reported missing input instead of a summary.
pub fn is_invalid_summary(summary: &str) -> bool {
    if summary.trim().is_empty() {
        return true;
    }
    let lower = summary.to_lowercase();
    INVALID_SUMMARY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Drop items whose summary is an invalid-content apology.
pub fn filter_invalid(items: Vec<ScoredItem>) -> Vec<ScoredItem> {
    let before = items.len();
    let kept: Vec<ScoredItem> = items.into_iter().filter(|i| !is_invalid_summary(&i.summary_cn)).collect();
    if kept.len() < before {
        info!(dropped = before - kept.len(), kept = kept.len(), "filtered invalid summaries");
    }
    kept
}

/// Parse the model's JSON-array reply. Tolerates code fences, leading
/// prose, and object-wrapped entries ({"content": ...} / {"summary": ...}).
fn parse_summary_array(response: &str) -> Option<Vec<String>> {
    let mut cleaned = response.trim().to_string();
    if cleaned.starts_with("```") {
        static FENCE_OPEN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        static FENCE_CLOSE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let open = FENCE_OPEN.get_or_init(|| Regex::new(r"^```\w*\n?").expect("valid regex"));
        let close = FENCE_CLOSE.get_or_init(|| Regex::new(r"\n?```$").expect("valid regex"));
        cleaned = close.replace(&open.replace(&cleaned, ""), "").to_string();
    }

    // The model may wrap the array in prose; take first '[' to last ']'
    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    if end <= start {
        return None;
    }
    let slice = &cleaned[start..=end];

    let values: Vec<Value> = match serde_json::from_str(slice) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "summary array did not parse");
            return None;
        }
    };

    Some(values.iter().map(flatten_summary_value).collect())
}

/// The model occasionally returns objects instead of bare strings.
fn flatten_summary_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("content")
            .or_else(|| map.get("summary"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_array() {
        let parsed = parse_summary_array(r#"["摘要一","摘要二"]"#).unwrap();
        assert_eq!(parsed, vec!["摘要一", "摘要二"]);
    }

    #[test]
    fn parses_fenced_array_with_prose() {
        let response = "好的，以下是摘要：\n```json\n[\"摘要一\", \"摘要二\"]\n```";
        let parsed = parse_summary_array(response).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn flattens_object_entries() {
        let parsed = parse_summary_array(r#"[{"content": "摘要一"}, {"summary": "摘要二"}]"#).unwrap();
        assert_eq!(parsed, vec!["摘要一", "摘要二"]);
    }

    #[test]
    fn non_json_reply_fails() {
        assert!(parse_summary_array("sorry I cannot").is_none());
        assert!(parse_summary_array("").is_none());
    }

    #[test]
    fn invalid_summary_detection() {
        assert!(is_invalid_summary("正文内容为空，无法生成摘要"));
        assert!(is_invalid_summary("The CONTENT IS EMPTY for this item"));
        assert!(is_invalid_summary(""));
        assert!(!is_invalid_summary("OpenAI 发布了新一代模型"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let t = truncate_chars("中文内容很长", 3);
        assert_eq!(t, "中文内...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
