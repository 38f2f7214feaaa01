use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

/// Full pipeline configuration. Every recognized setting is an explicit
/// field with a fixed default; a subset can be overridden by environment
/// variables (see `apply_env_overrides`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub newsroom: NewsroomConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub wechat: WeChatConfig,
    #[serde(default)]
    pub wecom: WeComConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsroomConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory holding the companion pipeline's archive.json / latest-24h.json.
    /// Defaults to data_dir when unset.
    #[serde(default)]
    pub shared_data_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NewsroomConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            shared_data_dir: None,
            log_level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_timeout")]
    pub api_timeout: String,
    #[serde(default = "default_api_max_retries")]
    pub api_max_retries: u32,
    #[serde(default = "default_api_retry_delay")]
    pub api_retry_delay: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_timeout: default_api_timeout(),
            api_max_retries: default_api_max_retries(),
            api_retry_delay: default_api_retry_delay(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_timeout() -> String {
    "60s".to_string()
}
fn default_api_max_retries() -> u32 {
    3
}
fn default_api_retry_delay() -> String {
    "2s".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_request_delay")]
    pub request_delay: String,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_dedup_title_threshold")]
    pub dedup_title_threshold: f64,
    #[serde(default = "default_max_news_per_category")]
    pub max_news_per_category: usize,
    #[serde(default = "default_cluster_similarity_threshold")]
    pub cluster_similarity_threshold: f64,
    #[serde(default = "default_cluster_min_articles")]
    pub cluster_min_articles: usize,
    #[serde(default = "default_cluster_time_window_hours")]
    pub cluster_time_window_hours: u32,
    #[serde(default = "default_max_candidate_topics")]
    pub max_candidate_topics: usize,
    #[serde(default = "default_archive_retain_days")]
    pub archive_retain_days: i64,
    #[serde(default = "default_translate_free_timeout")]
    pub translate_free_timeout: String,
    #[serde(default = "default_translate_batch_size")]
    pub translate_batch_size: usize,
    #[serde(default = "default_summarize_batch_size")]
    pub summarize_batch_size: usize,
    /// Ask the model to bucket items instead of the rule table.
    #[serde(default)]
    pub classify_with_ai: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            request_delay: default_request_delay(),
            window_hours: default_window_hours(),
            max_content_length: default_max_content_length(),
            dedup_title_threshold: default_dedup_title_threshold(),
            max_news_per_category: default_max_news_per_category(),
            cluster_similarity_threshold: default_cluster_similarity_threshold(),
            cluster_min_articles: default_cluster_min_articles(),
            cluster_time_window_hours: default_cluster_time_window_hours(),
            max_candidate_topics: default_max_candidate_topics(),
            archive_retain_days: default_archive_retain_days(),
            translate_free_timeout: default_translate_free_timeout(),
            translate_batch_size: default_translate_batch_size(),
            summarize_batch_size: default_summarize_batch_size(),
            classify_with_ai: false,
        }
    }
}

fn default_request_timeout() -> String {
    "30s".to_string()
}
fn default_request_delay() -> String {
    "1s".to_string()
}
fn default_window_hours() -> u32 {
    // "past 24 hours" stretched by 4 to absorb clock skew and stragglers
    28
}
fn default_max_content_length() -> usize {
    3000
}
fn default_dedup_title_threshold() -> f64 {
    0.8
}
fn default_max_news_per_category() -> usize {
    10
}
fn default_cluster_similarity_threshold() -> f64 {
    0.58
}
fn default_cluster_min_articles() -> usize {
    4
}
fn default_cluster_time_window_hours() -> u32 {
    24
}
fn default_max_candidate_topics() -> usize {
    8
}
fn default_archive_retain_days() -> i64 {
    45
}
fn default_translate_free_timeout() -> String {
    "8s".to_string()
}
fn default_translate_batch_size() -> usize {
    5
}
fn default_summarize_batch_size() -> usize {
    2
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeChatConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_wechat_api_base")]
    pub api_base: String,
}

fn default_wechat_api_base() -> String {
    "https://api.weixin.qq.com/cgi-bin".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeComConfig {
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeishuConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub bitable_token: String,
    #[serde(default)]
    pub table_id: String,
}

impl Config {
    pub fn shared_data_dir(&self) -> &Path {
        self.newsroom
            .shared_data_dir
            .as_deref()
            .unwrap_or(&self.newsroom.data_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        parse_duration_or(&self.pipeline.request_timeout, Duration::from_secs(30))
    }

    pub fn request_delay(&self) -> Duration {
        parse_duration_or(&self.pipeline.request_delay, Duration::from_secs(1))
    }

    pub fn api_timeout(&self) -> Duration {
        parse_duration_or(&self.llm.api_timeout, Duration::from_secs(60))
    }

    pub fn api_retry_delay(&self) -> Duration {
        parse_duration_or(&self.llm.api_retry_delay, Duration::from_secs(2))
    }

    pub fn translate_free_timeout(&self) -> Duration {
        parse_duration_or(&self.pipeline.translate_free_timeout, Duration::from_secs(8))
    }
}

fn parse_duration_or(s: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(s).unwrap_or(fallback)
}

/// Load config from an optional TOML file, then apply env overrides.
/// A missing file is not an error; all settings have defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(ConfigError::ReadFile)
            .context("reading config file")?;
        toml::from_str(&content).map_err(ConfigError::Parse)?
    } else {
        Config {
            newsroom: NewsroomConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            wechat: WeChatConfig::default(),
            wecom: WeComConfig::default(),
            feishu: FeishuConfig::default(),
        }
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// The recognized environment variable set. Env always wins over TOML.
fn apply_env_overrides(config: &mut Config) {
    let set = |target: &mut String, var: &str| {
        if let Ok(v) = std::env::var(var)
            && !v.is_empty()
        {
            *target = v;
        }
    };

    set(&mut config.llm.api_key, "DEEPSEEK_API_KEY");
    set(&mut config.llm.base_url, "DEEPSEEK_BASE_URL");
    set(&mut config.llm.model, "DEEPSEEK_MODEL");
    set(&mut config.wechat.app_id, "WECHAT_APP_ID");
    set(&mut config.wechat.app_secret, "WECHAT_APP_SECRET");
    set(&mut config.wecom.webhook_url, "WECOM_WEBHOOK_URL");
    set(&mut config.feishu.app_id, "FEISHU_APP_ID");
    set(&mut config.feishu.app_secret, "FEISHU_APP_SECRET");
    set(&mut config.feishu.bitable_token, "FEISHU_BITABLE_TOKEN");
    set(&mut config.feishu.table_id, "FEISHU_TABLE_ID");
    set(&mut config.newsroom.log_level, "LOG_LEVEL");

    if let Ok(v) = std::env::var("SHARED_DATA_DIR")
        && !v.is_empty()
    {
        config.newsroom.shared_data_dir = Some(PathBuf::from(v));
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    for (name, value) in [
        ("request_timeout", &config.pipeline.request_timeout),
        ("request_delay", &config.pipeline.request_delay),
        ("translate_free_timeout", &config.pipeline.translate_free_timeout),
        ("llm.api_timeout", &config.llm.api_timeout),
        ("llm.api_retry_delay", &config.llm.api_retry_delay),
    ] {
        humantime::parse_duration(value)
            .map_err(|e| ConfigError::Validation(format!("{name} '{value}': {e}")))?;
    }

    if !(0.0..=1.0).contains(&config.pipeline.dedup_title_threshold) {
        return Err(ConfigError::Validation(format!(
            "dedup_title_threshold {} must be within [0, 1]",
            config.pipeline.dedup_title_threshold
        ))
        .into());
    }
    if !(0.0..=1.0).contains(&config.pipeline.cluster_similarity_threshold) {
        return Err(ConfigError::Validation(format!(
            "cluster_similarity_threshold {} must be within [0, 1]",
            config.pipeline.cluster_similarity_threshold
        ))
        .into());
    }
    if config.pipeline.archive_retain_days < 1 {
        return Err(ConfigError::Validation("archive_retain_days must be at least 1".to_string()).into());
    }
    if config.pipeline.summarize_batch_size == 0 || config.pipeline.translate_batch_size == 0 {
        return Err(ConfigError::Validation("batch sizes must be at least 1".to_string()).into());
    }

    Ok(())
}
