use tracing::info;

use crate::keywords;
use crate::models::{RawItem, ScoredItem};
use crate::sources;

/// Admission rule: at least one core keyword and no exclude keyword.
/// Admitted items get a multi-dimensional relevance score:
///   high-value hits        +3.0 each
///   core hits              +1.0 each, capped at 5.0
///   aux hits               +0.5 each, capped at 2.0
///   source priority bonus  +2.0 / +1.5 / +1.0 / 0
///   low-signal hits        -1.5 each
/// floored at 0.1. Output is sorted by score, descending.
pub fn filter_and_score(items: Vec<RawItem>) -> Vec<ScoredItem> {
    let tables = keywords::tables();
    let total = items.len();
    let mut excluded = 0usize;
    let mut no_keywords = 0usize;
    let mut results: Vec<ScoredItem> = Vec::new();

    for item in items {
        let text = format!("{} {} {}", item.title, item.summary, item.content);

        if tables.exclude.any_match(&text) {
            excluded += 1;
            continue;
        }

        let core = tables.core.matches(&text);
        if core.is_empty() {
            no_keywords += 1;
            continue;
        }

        let high = tables.high_value.matches(&text);
        let aux = tables.aux.matches(&text);
        let low_signal = tables.low_signal.matches(&text).len();

        let mut score = high.len() as f64 * 3.0;
        score += (core.len() as f64).min(5.0);
        score += (aux.len() as f64 * 0.5).min(2.0);
        score += source_bonus(&item.source_key);
        score -= low_signal as f64 * 1.5;
        let score = score.max(0.1);

        let is_gaming = tables.gaming.any_match(&text);

        let keywords_matched = high
            .iter()
            .chain(core.iter())
            .chain(aux.iter())
            .map(|s| s.to_string())
            .collect();

        results.push(ScoredItem::new(
            item,
            (score * 100.0).round() / 100.0,
            keywords_matched,
            is_gaming,
        ));
    }

    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    info!(
        total,
        passed = results.len(),
        excluded,
        no_keywords,
        "relevance filter applied"
    );
    if let (Some(first), Some(last)) = (results.first(), results.last()) {
        info!(
            top = first.relevance_score,
            bottom = last.relevance_score,
            "score range"
        );
    }

    results
}

fn source_bonus(source_key: &str) -> f64 {
    match sources::source_priority(source_key) {
        1 => 2.0,
        2 => 1.5,
        3 => 1.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, SourceType};

    fn item(title: &str, summary: &str, source_key: &str) -> RawItem {
        RawItem {
            id: format!("id-{title}"),
            title: title.to_string(),
            url: format!("https://example.com/{}", title.len()),
            source_key: source_key.to_string(),
            source_name: source_key.to_string(),
            source_type: SourceType::EnMedia,
            language: Language::En,
            pub_time: None,
            summary: summary.to_string(),
            content: String::new(),
        }
    }

    #[test]
    fn admission_requires_core_and_no_exclude() {
        let scored = filter_and_score(vec![
            item("OpenAI launches new LLM", "", "techmeme"),
            item("Local bakery opens downtown", "", "techmeme"),
            item("Sponsored: best AI deals this webinar", "", "techmeme"),
        ]);
        assert_eq!(scored.len(), 1);
        assert!(scored[0].raw.title.contains("OpenAI"));
    }

    #[test]
    fn every_scored_item_is_at_least_floor() {
        // Low-signal penalties can push the raw score negative
        let scored = filter_and_score(vec![item(
            "Top 10 AI tips roundup guide",
            "opinion recap podcast newsletter",
            "unknown",
        )]);
        assert_eq!(scored.len(), 1);
        assert!(scored[0].relevance_score >= 0.1);
    }

    #[test]
    fn official_source_outscores_unknown() {
        let scored = filter_and_score(vec![
            item("New LLM research published", "", "shared_google_research"),
            item("New LLM research published", "", "shared"),
        ]);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].raw.source_key, "shared_google_research");
        assert!((scored[0].relevance_score - scored[1].relevance_score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bare_shared_key_gets_no_bonus() {
        assert_eq!(source_bonus("shared"), 0.0);
        assert_eq!(source_bonus("shared_theverge"), 1.5);
    }

    #[test]
    fn output_sorted_descending() {
        let scored = filter_and_score(vec![
            item("AI chatbot mentioned once", "", "unknown"),
            item("OpenAI launches GPT-5 model breakthrough", "major LLM release", "google_blog"),
        ]);
        assert!(scored.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
    }

    #[test]
    fn gaming_side_signal_detected() {
        let scored = filter_and_score(vec![item("AI NPC dialogue engine for games", "LLM powered", "unknown")]);
        assert!(scored[0].is_gaming_related);
    }
}
