use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;

/// One chat message in the OpenAI-compatible wire format.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// Shared chat client for the whole pipeline run. Constructed once at
/// start and passed down by reference; owns the token counter.
pub struct LlmGateway {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    retry_delay: Duration,
    total_tokens: AtomicU64,
}

impl LlmGateway {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(config.api_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.llm.base_url.trim_end_matches('/').to_string(),
            model: config.llm.model.clone(),
            api_key: config.llm.api_key.clone(),
            max_retries: config.llm.api_max_retries,
            retry_delay: config.api_retry_delay(),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Tokens consumed so far in this process.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Send a chat completion. Retries with linear backoff; returns `None`
    /// once retries are exhausted. Never panics, never propagates.
    pub async fn chat(&self, messages: &[ChatMessage], temperature: f64, max_tokens: u32) -> Option<String> {
        for attempt in 1..=self.max_retries {
            match self.chat_once(messages, temperature, max_tokens).await {
                Ok(text) => return Some(strip_think_tags(&text)),
                Err(e) => {
                    warn!(attempt, max = self.max_retries, error = %e, "LLM call failed");
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }
        None
    }

    async fn chat_once(&self, messages: &[ChatMessage], temperature: f64, max_tokens: u32) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "sending chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("API error {status}: {text}");
        }

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = parsed.usage {
            self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("response carried no content"))
    }
}

/// Remove a reasoning envelope some models prepend to their answer.
pub fn strip_think_tags(text: &str) -> String {
    if !text.contains("<think>") {
        return text.trim().to_string();
    }
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"));
    re.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_tags_are_stripped() {
        let text = "<think>\nreasoning here\n</think>\n最终答案";
        assert_eq!(strip_think_tags(text), "最终答案");
    }

    #[test]
    fn text_without_tags_passes_through() {
        assert_eq!(strip_think_tags("  plain answer  "), "plain answer");
    }

    #[test]
    fn multiple_think_blocks_are_removed() {
        let text = "<think>a</think>one <think>b</think>two";
        assert_eq!(strip_think_tags(text), "one two");
    }

    #[test]
    fn token_counter_starts_at_zero() {
        let config: crate::config::Config = toml::from_str("").unwrap();
        let gateway = LlmGateway::new(&config);
        assert_eq!(gateway.total_tokens(), 0);
        assert!(!gateway.is_configured());
    }
}
