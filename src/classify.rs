use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{ChatMessage, LlmGateway};
use crate::models::{Category, ScoredItem};

/// Sources whose items always land in a fixed bucket.
const SOURCE_CATEGORY_MAP: &[(&str, Category)] = &[
    ("claude_anthropic", Category::BigTech),
    ("google_blog", Category::BigTech),
    ("google_workspace", Category::BigTech),
    ("google_deepmind", Category::BigTech),
    ("google_research", Category::BigTech),
    ("producthunt", Category::AiProducts),
    ("hackernews", Category::AiTech),
    ("v2ex", Category::AiTech),
];

const GAMING_KEYWORDS: &[&str] = &[
    "游戏", "game", "gaming", "npc", "手游", "端游", "电竞", "esport", "玩家", "player", "买量", "获客",
    "游戏发行", "app store", "google play", "游戏公司", "游戏开发", "虚拟人", "数字人", "ugc", "unity", "unreal",
];

const BIG_TECH_COMPANIES: &[&str] = &["openai", "google", "meta", "microsoft", "anthropic", "deepmind", "facebook"];

const BIG_TECH_ACTIONS: &[&str] = &[
    "收购", "并购", "merger", "acquisition", "acquir", "战略", "策略", "投资", "融资", "funding", "ipo", "上市",
    "估值", "valuation",
];

const PRODUCT_KEYWORDS: &[&str] = &[
    "发布", "launch", "推出", "release", "上线", "工具", "tool", "平台", "platform", "产品", "product", "应用",
    "app", "application", "功能", "feature", "服务", "service", "api", "插件", "plugin", "更新", "update", "升级",
    "upgrade",
];

const TECH_KEYWORDS: &[&str] = &[
    "模型", "model", "gpt", "llm", "大模型", "算法", "algorithm", "训练", "training", "推理", "inference", "参数",
    "parameter", "transformer", "diffusion", "gan", "技术突破", "breakthrough", "benchmark", "性能", "performance",
    "架构", "architecture",
];

/// Rule-based categorization. Phases fire in a fixed order: source map,
/// gaming, big-tech (company AND action), products, technology, then the
/// industry-news catch-all. Total: every item gets a category.
///
/// A gaming keyword in the title settles the bucket outright; a gaming
/// mention that only appears in the summary loses to an explicit
/// company-plus-action signal.
pub fn classify_single(title: &str, summary: &str, source_key: Option<&str>) -> Category {
    if let Some(key) = source_key
        && let Some((_, category)) = SOURCE_CATEGORY_MAP.iter().find(|(k, _)| *k == key)
    {
        return *category;
    }

    let title_lower = title.to_lowercase();
    let text = format!("{title} {summary}").to_lowercase();

    if contains_any(&title_lower, GAMING_KEYWORDS) {
        return Category::AiGaming;
    }

    let has_company = contains_any(&text, BIG_TECH_COMPANIES);
    let has_action = contains_any(&text, BIG_TECH_ACTIONS);
    if has_company && has_action {
        return Category::BigTech;
    }

    if contains_any(&text, GAMING_KEYWORDS) {
        return Category::AiGaming;
    }

    if contains_any(&text, PRODUCT_KEYWORDS) {
        return Category::AiProducts;
    }

    if contains_any(&text, TECH_KEYWORDS) {
        return Category::AiTech;
    }

    Category::IndustryNews
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Classify all items into the five buckets, preserving item order within
/// each bucket.
pub fn classify_batch(items: Vec<ScoredItem>) -> HashMap<Category, Vec<ScoredItem>> {
    let mut buckets: HashMap<Category, Vec<ScoredItem>> = Category::ALL.iter().map(|c| (*c, Vec::new())).collect();

    for mut item in items {
        let summary = item.display_summary().to_string();
        let category = classify_single(&item.raw.title, &summary, Some(&item.raw.source_key));
        item.category = Some(category);
        buckets.entry(category).or_default().push(item);
    }

    for category in Category::ALL {
        let count = buckets.get(&category).map(|v| v.len()).unwrap_or(0);
        info!(category = category.key(), count, "classified");
    }

    buckets
}

/// AI-assisted classification: up to 10 items per call, a JSON object
/// mapping index→category back. Unparseable batches fall back to rules.
pub async fn classify_batch_ai(gateway: &LlmGateway, items: Vec<ScoredItem>) -> HashMap<Category, Vec<ScoredItem>> {
    const BATCH_SIZE: usize = 10;

    let mut assigned: Vec<Option<Category>> = vec![None; items.len()];

    for (chunk_idx, chunk) in items.chunks(BATCH_SIZE).enumerate() {
        let start = chunk_idx * BATCH_SIZE;
        let listing: Vec<Value> = chunk
            .iter()
            .enumerate()
            .map(|(j, item)| {
                serde_json::json!({
                    "index": j,
                    "title": item.display_title(),
                    "summary": item.display_summary().chars().take(200).collect::<String>(),
                })
            })
            .collect();

        let prompt = format!(
            "请对以下新闻进行分类，从五个类别中选择一个最合适的：\n\n\
             1. big_tech - 大厂动态：OpenAI、Google、Meta、Microsoft等外部公司的重大动作\n\
             2. ai_products - AI应用与产品：AI工具、平台、商业化产品发布\n\
             3. ai_tech - AI模型与技术：模型、算法、技术进展、基础能力提升\n\
             4. ai_gaming - AI与游戏：AI在游戏开发、发行、运营中的应用\n\
             5. industry_news - 行业新闻：不属于以上四类，但仍具行业意义\n\n\
             新闻列表：\n{}\n\n\
             请按JSON格式输出，如: {{\"0\": \"big_tech\", \"1\": \"ai_products\"}}\n只输出JSON，不要其他内容。",
            serde_json::to_string_pretty(&listing).unwrap_or_default()
        );
        let messages = [
            ChatMessage::system("你是一位专业的科技新闻编辑，擅长对新闻进行准确分类。"),
            ChatMessage::user(prompt),
        ];

        let parsed = match gateway.chat(&messages, 0.1, 500).await {
            Some(response) => parse_category_map(&response),
            None => None,
        };

        match parsed {
            Some(map) => {
                for (j, category) in map {
                    if let Some(slot) = assigned.get_mut(start + j) {
                        *slot = Some(category);
                    }
                }
            }
            None => warn!(batch = chunk_idx, "AI classification failed, using rules for batch"),
        }
    }

    let mut buckets: HashMap<Category, Vec<ScoredItem>> = Category::ALL.iter().map(|c| (*c, Vec::new())).collect();
    for (mut item, ai_category) in items.into_iter().zip(assigned) {
        let category = ai_category.unwrap_or_else(|| {
            classify_single(&item.raw.title, &item.display_summary().to_string(), Some(&item.raw.source_key))
        });
        item.category = Some(category);
        buckets.entry(category).or_default().push(item);
    }
    buckets
}

fn parse_category_map(response: &str) -> Option<HashMap<usize, Category>> {
    let mut cleaned = response.trim().to_string();
    if cleaned.starts_with("```") {
        static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let re = FENCE.get_or_init(|| Regex::new(r"^```\w*\n?|\n?```$").expect("valid regex"));
        cleaned = re.replace_all(&cleaned, "").to_string();
    }

    let value: Value = serde_json::from_str(cleaned.trim()).ok()?;
    let object = value.as_object()?;

    let mut map = HashMap::new();
    for (k, v) in object {
        let idx: usize = k.parse().ok()?;
        let category = match v.as_str()? {
            "big_tech" => Category::BigTech,
            "ai_products" => Category::AiProducts,
            "ai_tech" => Category::AiTech,
            "ai_gaming" => Category::AiGaming,
            "industry_news" => Category::IndustryNews,
            _ => return None,
        };
        map.insert(idx, category);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_map_takes_precedence() {
        assert_eq!(
            classify_single("Some unrelated title", "", Some("claude_anthropic")),
            Category::BigTech
        );
    }

    #[test]
    fn acquisition_plus_company_beats_summary_gaming_mention() {
        assert_eq!(
            classify_single("OpenAI acquires startup for $1B", "the startup built a game engine", None),
            Category::BigTech
        );
        assert_eq!(
            classify_single("AI NPC dialogue in games", "Unity plugin", None),
            Category::AiGaming
        );
    }

    #[test]
    fn summary_gaming_mention_still_counts_without_big_tech_signal() {
        assert_eq!(
            classify_single("New AI middleware ships", "built for game studios and esports", None),
            Category::AiGaming
        );
    }

    #[test]
    fn company_without_action_is_not_big_tech() {
        // "Google" alone, no strategic action: falls through to products
        assert_eq!(
            classify_single("Google updates its AI platform", "", None),
            Category::AiProducts
        );
    }

    #[test]
    fn tech_phase_catches_model_news() {
        assert_eq!(
            classify_single("New transformer architecture benchmark results", "", None),
            Category::AiTech
        );
    }

    #[test]
    fn catch_all_is_industry_news() {
        assert_eq!(classify_single("AI conference attendance doubles", "", None), Category::IndustryNews);
    }

    #[test]
    fn every_item_gets_a_bucket() {
        use crate::models::{Language, RawItem, SourceType};
        let items: Vec<ScoredItem> = ["a title", "游戏 AI 上线", "New model release"]
            .iter()
            .map(|t| {
                ScoredItem::new(
                    RawItem {
                        id: t.to_string(),
                        title: t.to_string(),
                        url: String::new(),
                        source_key: "unknown".to_string(),
                        source_name: String::new(),
                        source_type: SourceType::EnMedia,
                        language: Language::En,
                        pub_time: None,
                        summary: String::new(),
                        content: String::new(),
                    },
                    1.0,
                    Vec::new(),
                    false,
                )
            })
            .collect();

        let buckets = classify_batch(items);
        let total: usize = buckets.values().map(|v| v.len()).sum();
        assert_eq!(total, 3);
        for items in buckets.values() {
            for item in items {
                assert!(item.category.is_some());
            }
        }
    }

    #[test]
    fn category_map_parses_fenced_json() {
        let map = parse_category_map("```json\n{\"0\": \"big_tech\", \"1\": \"ai_gaming\"}\n```").unwrap();
        assert_eq!(map[&0], Category::BigTech);
        assert_eq!(map[&1], Category::AiGaming);
    }

    #[test]
    fn unknown_category_rejects_the_batch() {
        assert!(parse_category_map("{\"0\": \"sports\"}").is_none());
        assert!(parse_category_map("not json").is_none());
    }
}
