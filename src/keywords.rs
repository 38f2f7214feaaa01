use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// The five relevance tiers plus gaming and entity tables, compiled from
/// the embedded resource. The tables are data, not code: language parity
/// and per-tier tests come for free.
pub struct KeywordTables {
    pub high_value: Tier,
    pub core: Tier,
    pub aux: Tier,
    pub exclude: Tier,
    pub low_signal: Tier,
    pub gaming: Tier,
    entities: Vec<EntityPattern>,
}

pub struct Tier {
    patterns: Vec<(String, Regex)>,
}

struct EntityPattern {
    regex: Regex,
    name: String,
    concrete: bool,
}

#[derive(Deserialize)]
struct RawTables {
    tiers: RawTiers,
    gaming: RawTier,
    entities: Vec<RawEntity>,
}

#[derive(Deserialize)]
struct RawTiers {
    high_value: RawTier,
    core: RawTier,
    aux: RawTier,
    exclude: RawTier,
    low_signal: RawTier,
}

#[derive(Deserialize)]
struct RawTier {
    zh: Vec<String>,
    en: Vec<String>,
}

#[derive(Deserialize)]
struct RawEntity {
    pattern: String,
    name: String,
    concrete: bool,
}

impl Tier {
    fn compile(raw: &RawTier) -> Result<Self> {
        let mut patterns = Vec::with_capacity(raw.zh.len() + raw.en.len());
        for p in &raw.zh {
            let regex = Regex::new(&regex::escape(p)).with_context(|| format!("compiling zh pattern '{p}'"))?;
            patterns.push((p.clone(), regex));
        }
        for p in &raw.en {
            let regex = RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("compiling en pattern '{p}'"))?;
            patterns.push((p.clone(), regex));
        }
        Ok(Self { patterns })
    }

    /// Labels of every pattern that matches the text.
    pub fn matches(&self, text: &str) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(label, _)| label.as_str())
            .collect()
    }

    pub fn any_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, re)| re.is_match(text))
    }
}

impl KeywordTables {
    fn load() -> Result<Self> {
        let raw: RawTables =
            serde_json::from_str(include_str!("../resources/keywords.json")).context("parsing keyword resource")?;

        let entities = raw
            .entities
            .iter()
            .map(|e| {
                let regex = RegexBuilder::new(&e.pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("compiling entity pattern '{}'", e.pattern))?;
                Ok(EntityPattern {
                    regex,
                    name: e.name.clone(),
                    concrete: e.concrete,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            high_value: Tier::compile(&raw.tiers.high_value)?,
            core: Tier::compile(&raw.tiers.core)?,
            aux: Tier::compile(&raw.tiers.aux)?,
            exclude: Tier::compile(&raw.tiers.exclude)?,
            low_signal: Tier::compile(&raw.tiers.low_signal)?,
            gaming: Tier::compile(&raw.gaming)?,
            entities,
        })
    }

    /// Extract normalized entity names mentioned in the text.
    pub fn extract_entities(&self, text: &str) -> BTreeSet<String> {
        self.entities
            .iter()
            .filter(|e| e.regex.is_match(text))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Concrete entities are specific companies or products; generic ones
    /// (safety, policy, agent, ...) cannot anchor a cluster on their own.
    pub fn is_concrete_entity(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e.name == name && e.concrete)
    }
}

/// Shared compiled tables. The resource is embedded, so a compile failure
/// is a build defect caught by the tests below.
pub fn tables() -> &'static KeywordTables {
    static TABLES: OnceLock<KeywordTables> = OnceLock::new();
    TABLES.get_or_init(|| KeywordTables::load().expect("embedded keyword resource is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_resource_compiles() {
        assert!(KeywordTables::load().is_ok());
    }

    #[test]
    fn core_matches_both_languages() {
        let t = tables();
        assert!(!t.core.matches("OpenAI ships a new LLM").is_empty());
        assert!(!t.core.matches("国产大模型迎来新进展").is_empty());
        assert!(t.core.matches("quarterly earnings for retail chains").is_empty());
    }

    #[test]
    fn english_matching_is_case_insensitive() {
        let t = tables();
        assert!(t.exclude.any_match("SPONSORED: the best deals"));
        assert!(t.high_value.any_match("Acme LAUNCHES new product"));
    }

    #[test]
    fn ai_word_boundary_holds() {
        let t = tables();
        // "paid" and "air" must not fire the \bAI\b pattern
        assert!(t.core.matches("paid air travel sale").is_empty());
    }

    #[test]
    fn entities_normalize_aliases() {
        let t = tables();
        let e = t.extract_entities("谷歌和 Alphabet 同时发声");
        assert!(e.contains("google"));
        assert_eq!(e.iter().filter(|n| *n == "google").count(), 1);
    }

    #[test]
    fn concrete_flag_follows_resource() {
        let t = tables();
        assert!(t.is_concrete_entity("samsung"));
        assert!(t.is_concrete_entity("galaxy_s26"));
        assert!(!t.is_concrete_entity("safety"));
        assert!(!t.is_concrete_entity("gpt"));
        assert!(!t.is_concrete_entity("agent"));
    }

    #[test]
    fn gaming_tier_is_a_side_signal() {
        let t = tables();
        assert!(t.gaming.any_match("AI NPC dialogue in games"));
        assert!(!t.gaming.any_match("model weights released"));
    }
}
