use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::dedup::normalize_title;
use crate::keywords;
use crate::models::{NewsItem, TopicCandidate, TopicCluster};
use crate::normalize;

/// Minimum normalized-title length for an item to participate at all.
const MIN_TITLE_CHARS: usize = 8;
/// Pairwise title comparisons per cluster are capped to the first members.
const MAX_COMPARE_MEMBERS: usize = 10;
/// A cluster is hot only when several distinct outlets covered the story.
const MIN_SOURCES: usize = 2;
/// Required overlap for entity-based attachment.
const MIN_ENTITY_OVERLAP: usize = 2;

pub struct ClustererConfig {
    pub similarity_threshold: f64,
    pub min_articles: usize,
    pub max_candidates: usize,
}

/// Group items reporting the same event, by title similarity or shared
/// concrete entities. Seed-grow: each item either joins the first cluster
/// that accepts it or opens a new one.
pub fn cluster(items: Vec<NewsItem>, config: &ClustererConfig) -> Vec<TopicCluster> {
    let tables = keywords::tables();
    let mut clusters: Vec<TopicCluster> = Vec::new();

    for item in items {
        let norm_title = normalize_title(display_title(&item));
        if norm_title.chars().count() < MIN_TITLE_CHARS {
            continue;
        }

        let mut attached = false;
        for cluster in &mut clusters {
            if accepts(cluster, &item, &norm_title, config.similarity_threshold, tables) {
                attach(cluster, item.clone());
                attached = true;
                break;
            }
        }

        if !attached {
            let representative_title = display_title(&item).to_string();
            clusters.push(TopicCluster {
                sources: [item.site_id.clone()].into_iter().collect(),
                entities: item.entities.clone(),
                representative_title,
                articles: vec![item],
            });
        }
    }

    let total = clusters.len();
    let mut hot: Vec<TopicCluster> = clusters.into_iter().filter(|c| is_hot(c, config.min_articles)).collect();
    hot.sort_by_key(|c| std::cmp::Reverse(c.count() * c.source_count()));
    hot.truncate(config.max_candidates);

    info!(clusters = total, hot = hot.len(), "clustering complete");
    hot
}

fn accepts(
    cluster: &TopicCluster,
    item: &NewsItem,
    norm_title: &str,
    threshold: f64,
    tables: &keywords::KeywordTables,
) -> bool {
    // Strategy A: title similarity against the first members
    for member in cluster.articles.iter().take(MAX_COMPARE_MEMBERS) {
        let member_title = normalize_title(display_title(member));
        if normalize::lcs_ratio(norm_title, &member_title) >= threshold {
            debug!(title = %item.title, cluster = %cluster.representative_title, "attached by title");
            return true;
        }
    }

    // Strategy B: entity overlap, anchored by at least one concrete entity
    let overlap: Vec<&String> = item.entities.intersection(&cluster.entities).collect();
    if overlap.len() >= MIN_ENTITY_OVERLAP && overlap.iter().any(|e| tables.is_concrete_entity(e)) {
        debug!(title = %item.title, cluster = %cluster.representative_title, "attached by entities");
        return true;
    }

    false
}

fn attach(cluster: &mut TopicCluster, item: NewsItem) {
    cluster.sources.insert(item.site_id.clone());
    // Entity set grows monotonically
    cluster.entities.extend(item.entities.iter().cloned());

    let candidate = display_title(&item).to_string();
    if title_score(&candidate) > title_score(&cluster.representative_title) {
        cluster.representative_title = candidate;
    }

    cluster.articles.push(item);
}

fn display_title(item: &NewsItem) -> &str {
    item.title_zh.as_deref().filter(|t| !t.is_empty()).unwrap_or(&item.title)
}

/// Total order for representative-title selection: Chinese beats English,
/// headline-length (15–50 chars) beats too short or too long, repo slugs
/// lose to prose.
fn title_score(title: &str) -> i32 {
    let mut score = 0;
    if normalize::han_ratio(title) >= 0.3 {
        score += 4;
    }
    let len = title.chars().count();
    if (15..=50).contains(&len) {
        score += 2;
    }
    if is_repo_title(title) {
        score -= 3;
    }
    score
}

/// "org/repo"-shaped titles coming from code-hosting trackers.
pub fn is_repo_title(title: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid regex"));
    re.is_match(title.trim())
}

fn is_hot(cluster: &TopicCluster, min_articles: usize) -> bool {
    if cluster.count() < min_articles || cluster.source_count() < MIN_SOURCES {
        return false;
    }
    let non_repo = cluster.articles.iter().filter(|a| !is_repo_title(&a.title)).count();
    non_repo >= 2
}

/// Summaries for the operator-facing candidate list.
pub fn candidates(clusters: &[TopicCluster]) -> Vec<TopicCandidate> {
    clusters
        .iter()
        .enumerate()
        .map(|(topic_id, c)| TopicCandidate {
            topic_id,
            title: c.representative_title.clone(),
            article_count: c.count(),
            source_count: c.source_count(),
            sample_titles: c.articles.iter().take(3).map(|a| display_title(a).to_string()).collect(),
            sources: c.sources.iter().cloned().collect(),
            entities: c.entities.iter().cloned().collect(),
        })
        .collect()
}

/// Build the clustering view of a record: entities extracted from both
/// title variants.
pub fn to_news_item(
    id: &str,
    title: &str,
    title_zh: Option<&str>,
    url: &str,
    source: &str,
    site_id: &str,
    published_at: Option<chrono::DateTime<chrono::Utc>>,
) -> NewsItem {
    let tables = keywords::tables();
    let mut entities = tables.extract_entities(title);
    if let Some(zh) = title_zh {
        entities.extend(tables.extract_entities(zh));
    }
    NewsItem {
        id: id.to_string(),
        title: title.to_string(),
        title_zh: title_zh.map(|s| s.to_string()),
        url: url.to_string(),
        source: source.to_string(),
        site_id: site_id.to_string(),
        published_at,
        entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(title: &str, site_id: &str) -> NewsItem {
        to_news_item(
            title,
            title,
            None,
            &format!("https://example.com/{}", title.len()),
            site_id,
            site_id,
            None,
        )
    }

    fn test_config() -> ClustererConfig {
        ClustererConfig {
            similarity_threshold: 0.58,
            min_articles: 4,
            max_candidates: 8,
        }
    }

    #[test]
    fn entity_overlap_clusters_dissimilar_titles() {
        let config = ClustererConfig {
            min_articles: 2,
            ..test_config()
        };
        let clusters = cluster(
            vec![
                news("Samsung unveils Galaxy S26 AI features", "siteA"),
                news("Galaxy S26: Samsung's big AI push this year", "siteB"),
            ],
            &config,
        );
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count(), 2);
        assert!(clusters[0].entities.contains("samsung"));
        assert!(clusters[0].entities.contains("galaxy_s26"));
    }

    #[test]
    fn generic_overlap_alone_does_not_cluster() {
        let config = ClustererConfig {
            min_articles: 2,
            ..test_config()
        };
        // Overlap is {agent, safety}: two entities but none concrete
        let clusters = cluster(
            vec![
                news("Agent safety rules proposed for industry", "siteA"),
                news("New thinking about agent safety standards", "siteB"),
            ],
            &config,
        );
        // Titles are dissimilar enough and entities generic: two clusters,
        // neither hot at min_articles=2? Each has 1 article → no hot cluster.
        assert!(clusters.is_empty());
    }

    #[test]
    fn hot_requires_articles_sources_and_prose_titles() {
        let config = ClustererConfig {
            min_articles: 4,
            ..test_config()
        };
        let clusters = cluster(
            vec![
                news("OpenAI launches GPT-5 flagship model today", "siteA"),
                news("OpenAI launches GPT-5 flagship model worldwide", "siteB"),
                news("OpenAI launches GPT-5 flagship model for all", "siteC"),
                news("OpenAI launches GPT-5 flagship model soon", "siteA"),
            ],
            &config,
        );
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert!(c.count() >= 4);
        assert!(c.source_count() >= 2);
        assert!(c.articles.iter().filter(|a| !is_repo_title(&a.title)).count() >= 2);
    }

    #[test]
    fn single_source_cluster_is_not_hot() {
        let config = ClustererConfig {
            min_articles: 4,
            ..test_config()
        };
        let clusters = cluster(
            vec![
                news("OpenAI launches GPT-5 flagship model today", "siteA"),
                news("OpenAI launches GPT-5 flagship model worldwide", "siteA"),
                news("OpenAI launches GPT-5 flagship model for all", "siteA"),
                news("OpenAI launches GPT-5 flagship model soon", "siteA"),
            ],
            &config,
        );
        assert!(clusters.is_empty());
    }

    #[test]
    fn short_titles_are_skipped() {
        let config = ClustererConfig {
            min_articles: 1,
            ..test_config()
        };
        let clusters = cluster(vec![news("GPT-5", "siteA")], &config);
        assert!(clusters.is_empty());
    }

    #[test]
    fn repo_titles_detected() {
        assert!(is_repo_title("openai/gpt-5"));
        assert!(is_repo_title("org-name/repo_name.rs"));
        assert!(!is_repo_title("OpenAI launches GPT-5"));
        assert!(!is_repo_title("a/b/c"));
    }

    #[test]
    fn representative_title_prefers_chinese_headline_length() {
        let config = ClustererConfig {
            min_articles: 2,
            ..test_config()
        };
        let mut zh = news("OpenAI发布GPT-5旗舰模型，性能大幅提升", "siteB");
        zh.title = "OpenAI launches GPT-5 flagship model".to_string();
        zh.title_zh = Some("OpenAI发布GPT-5旗舰模型，性能大幅提升".to_string());

        let clusters = cluster(vec![news("OpenAI launches GPT-5 flagship model today", "siteA"), zh], &config);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].representative_title, "OpenAI发布GPT-5旗舰模型，性能大幅提升");
    }

    #[test]
    fn entity_union_grows_monotonically() {
        let config = ClustererConfig {
            min_articles: 2,
            ..test_config()
        };
        let clusters = cluster(
            vec![
                news("Samsung unveils Galaxy S26 AI features", "siteA"),
                news("Galaxy S26: Samsung partners with Google on AI", "siteB"),
            ],
            &config,
        );
        assert_eq!(clusters.len(), 1);
        for e in ["samsung", "galaxy_s26", "google"] {
            assert!(clusters[0].entities.contains(e), "missing {e}");
        }
    }
}
