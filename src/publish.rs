use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::PublishError;
use crate::models::ArchiveRecord;
use crate::normalize;

/// Seconds of slack before a cached token is considered expired.
const TOKEN_SKEW_SECS: i64 = 60;
const FEISHU_BASE: &str = "https://open.feishu.cn/open-apis";
/// Feishu Bitable accepts at most this many records per batch_create.
const FEISHU_BATCH: usize = 500;
/// The written-ids ledger keeps only the most recent entries.
const FEISHU_LEDGER_CAP: usize = 5000;

// ── WeChat Official Account draft box ───────────────────────────────────

pub struct WeChatDraft {
    client: Client,
    app_id: String,
    app_secret: String,
    api_base: String,
    data_dir: PathBuf,
}

impl WeChatDraft {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            app_id: config.wechat.app_id.clone(),
            app_secret: config.wechat.app_secret.clone(),
            api_base: config.wechat.api_base.trim_end_matches('/').to_string(),
            data_dir: config.newsroom.data_dir.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }

    fn token_cache_path(&self) -> PathBuf {
        self.data_dir.join("wechat_token.json")
    }

    /// Access token, cached on disk with a safety skew.
    async fn access_token(&self) -> Result<String, PublishError> {
        if !self.is_configured() {
            return Err(PublishError::MissingCredentials("wechat"));
        }

        let now = Utc::now().timestamp();
        if let Ok(content) = std::fs::read_to_string(self.token_cache_path())
            && let Ok(cached) = serde_json::from_str::<Value>(&content)
            && cached["expires_at"].as_i64().unwrap_or(0) > now + TOKEN_SKEW_SECS
            && let Some(token) = cached["access_token"].as_str()
        {
            return Ok(token.to_string());
        }

        let url = format!("{}/token", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
            ])
            .send()
            .await?;
        let data: Value = response.json().await?;

        let Some(token) = data["access_token"].as_str() else {
            return Err(PublishError::Token(data.to_string()));
        };
        let expires_in = data["expires_in"].as_i64().unwrap_or(7200);

        let cache = json!({"access_token": token, "expires_at": now + expires_in});
        if let Some(parent) = self.token_cache_path().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(self.token_cache_path(), serde_json::to_string_pretty(&cache).unwrap_or_default())
        {
            warn!(error = %e, "failed to cache wechat token");
        }

        info!("wechat access token refreshed");
        Ok(token.to_string())
    }

    /// Upload an image as permanent material; returns its media_id.
    pub async fn upload_image(&self, path: &Path) -> Option<String> {
        let token = match self.access_token().await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "cannot get access token for upload");
                return None;
            }
        };

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cover image unreadable");
                return None;
            }
        };
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "cover.jpg".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("media", part);

        let url = format!("{}/material/add_material", self.api_base);
        let result: Option<Value> = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok();

        match result.as_ref().and_then(|v| v["media_id"].as_str()) {
            Some(media_id) => {
                info!(media_id, "cover image uploaded");
                Some(media_id.to_string())
            }
            None => {
                error!(response = ?result, "image upload failed");
                None
            }
        }
    }

    /// Submit an article to the draft box. Falls back to uploading the
    /// default cover when no thumb is supplied. Returns the draft media_id.
    pub async fn add_draft(&self, title: &str, html: &str, thumb_media_id: Option<String>) -> Option<String> {
        let token = match self.access_token().await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "cannot get access token for draft");
                return None;
            }
        };

        let thumb = match thumb_media_id {
            Some(id) => id,
            None => {
                let default_cover = self.data_dir.join("default_cover.jpg");
                if !default_cover.exists() {
                    error!(path = %default_cover.display(), "no thumb and no default cover image");
                    return None;
                }
                self.upload_image(&default_cover).await?
            }
        };

        let body = json!({
            "articles": [{
                "title": title,
                "author": "AI日报",
                "thumb_media_id": thumb,
                "digest": "",
                "content": html,
                "content_source_url": "",
                "need_open_comment": 0,
                "only_fans_can_comment": 0,
            }]
        });

        let url = format!("{}/draft/add", self.api_base);
        let result: Option<Value> = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok();

        match result.as_ref().and_then(|v| v["media_id"].as_str()) {
            Some(media_id) => {
                info!(media_id, title, "draft submitted");
                Some(media_id.to_string())
            }
            None => {
                error!(response = ?result, "draft submission failed");
                None
            }
        }
    }

    /// Publish a titled article and record it in the history ledger.
    pub async fn publish(&self, title: &str, html: &str, entry_type: &str) -> bool {
        match self.add_draft(title, html, None).await {
            Some(media_id) => {
                self.record_history(title, &media_id, entry_type);
                true
            }
            None => false,
        }
    }

    fn record_history(&self, title: &str, media_id: &str, entry_type: &str) {
        let path = self.data_dir.join("publish_history.json");
        let mut history: Vec<Value> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
            .unwrap_or_default();

        history.push(json!({
            "title": title,
            "media_id": media_id,
            "published_at": normalize::format_shanghai(Utc::now(), "%Y-%m-%dT%H:%M:%S%z"),
            "type": entry_type,
        }));

        let _ = std::fs::create_dir_all(&self.data_dir);
        match serde_json::to_string_pretty(&history) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&path, content) {
                    warn!(error = %e, "failed to record publish history");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize publish history"),
        }
    }
}

// ── WeCom group-bot webhook ─────────────────────────────────────────────

pub struct WeComWebhook {
    client: Client,
    webhook_url: String,
}

impl WeComWebhook {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            webhook_url: config.wecom.webhook_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Push a markdown message to the group bot. Returns success.
    pub async fn send_markdown(&self, content: &str) -> bool {
        if !self.is_configured() {
            warn!("WECOM_WEBHOOK_URL not set, skipping push");
            return false;
        }

        let payload = json!({"msgtype": "markdown", "markdown": {"content": content}});
        let result: Result<Value, _> = async {
            let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
            response.json::<Value>().await
        }
        .await;

        match result {
            Ok(data) if data["errcode"].as_i64() == Some(0) => {
                info!("wecom push delivered");
                true
            }
            Ok(data) => {
                error!(response = %data, "wecom push rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "wecom push failed");
                false
            }
        }
    }
}

// ── Feishu Bitable sync ─────────────────────────────────────────────────

pub struct FeishuBitable {
    client: Client,
    app_id: String,
    app_secret: String,
    bitable_token: String,
    table_id: String,
}

impl FeishuBitable {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            app_id: config.feishu.app_id.clone(),
            app_secret: config.feishu.app_secret.clone(),
            bitable_token: config.feishu.bitable_token.clone(),
            table_id: config.feishu.table_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty() && !self.bitable_token.is_empty() && !self.table_id.is_empty()
    }

    async fn tenant_token(&self) -> Result<String, PublishError> {
        let response = self
            .client
            .post(format!("{FEISHU_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&json!({"app_id": self.app_id, "app_secret": self.app_secret}))
            .send()
            .await?;
        let data: Value = response.json().await?;
        if data["code"].as_i64() != Some(0) {
            return Err(PublishError::Token(data.to_string()));
        }
        data["tenant_access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PublishError::Token("token missing from response".to_string()))
    }

    /// Append records in batches of ≤500. Returns the number written.
    pub async fn append(&self, records: &[Value]) -> Result<usize, PublishError> {
        if records.is_empty() {
            return Ok(0);
        }
        let token = self.tenant_token().await?;
        let url = format!(
            "{FEISHU_BASE}/bitable/v1/apps/{}/tables/{}/records/batch_create",
            self.bitable_token, self.table_id
        );

        let mut written = 0;
        for batch in records.chunks(FEISHU_BATCH) {
            let payload = json!({
                "records": batch.iter().map(|r| json!({"fields": r})).collect::<Vec<_>>(),
            });
            let response = self.client.post(&url).bearer_auth(&token).json(&payload).send().await?;
            let data: Value = response.json().await?;
            if data["code"].as_i64() != Some(0) {
                return Err(PublishError::Api {
                    service: "feishu",
                    message: data.to_string(),
                });
            }
            written += batch.len();
        }
        Ok(written)
    }

    /// Write items not yet in the ledger; cap the ledger afterwards.
    pub async fn sync_items(&self, items: &[ArchiveRecord], ledger_path: &Path) -> Result<usize> {
        if !self.is_configured() {
            warn!("feishu credentials not set, skipping sync");
            return Ok(0);
        }

        let mut written_ids = load_ledger(ledger_path);
        let new_items: Vec<&ArchiveRecord> = items.iter().filter(|i| !written_ids.contains(&i.id)).collect();
        if new_items.is_empty() {
            info!("no new items for feishu");
            return Ok(0);
        }

        let now_str = normalize::format_shanghai(Utc::now(), "%Y-%m-%d %H:%M");
        let records: Vec<Value> = new_items
            .iter()
            .map(|item| {
                let display_title = item.title_zh.clone().filter(|t| !t.is_empty()).unwrap_or_else(|| item.title.clone());
                let published = item
                    .published_at
                    .or(Some(item.first_seen_at))
                    .map(|t| normalize::format_shanghai(t, "%Y-%m-%d %H:%M"))
                    .unwrap_or_default();
                json!({
                    "标题": display_title,
                    "英文标题": item.title_en.clone().unwrap_or_else(|| item.title.clone()),
                    "链接": item.url,
                    "来源": if item.source.is_empty() { item.site_name.clone() } else { item.source.clone() },
                    "发布时间": published,
                    "采集时间": now_str,
                })
            })
            .collect();

        let count = self.append(&records).await.context("appending to feishu bitable")?;

        for item in &new_items {
            written_ids.push(item.id.clone());
        }
        if written_ids.len() > FEISHU_LEDGER_CAP {
            written_ids = written_ids.split_off(written_ids.len() - FEISHU_LEDGER_CAP);
        }
        save_ledger(ledger_path, &written_ids);

        info!(count, "feishu sync complete");
        Ok(count)
    }
}

fn load_ledger(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}

fn save_ledger(path: &Path, ids: &[String]) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string(ids) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(error = %e, "failed to save feishu ledger");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize feishu ledger"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_roundtrip_and_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feishu_written_ids.json");

        let ids: Vec<String> = (0..10).map(|i| format!("id{i}")).collect();
        save_ledger(&path, &ids);
        assert_eq!(load_ledger(&path), ids);

        let many: Vec<String> = (0..(FEISHU_LEDGER_CAP + 100)).map(|i| format!("id{i}")).collect();
        let mut capped = many.clone();
        capped = capped.split_off(capped.len() - FEISHU_LEDGER_CAP);
        assert_eq!(capped.len(), FEISHU_LEDGER_CAP);
        assert_eq!(capped.first().unwrap(), "id100");
    }

    #[test]
    fn missing_ledger_is_empty() {
        assert!(load_ledger(Path::new("/nonexistent/ledger.json")).is_empty());
    }

    #[test]
    fn unconfigured_clients_report_it() {
        let config: Config = toml::from_str("").unwrap();
        let client = Client::new();
        assert!(!WeChatDraft::new(&config, client.clone()).is_configured());
        assert!(!WeComWebhook::new(&config, client.clone()).is_configured());
        assert!(!FeishuBitable::new(&config, client).is_configured());
    }
}
