use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::{RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::MomentumError;
use crate::storage::{LocalStorage, keys};

#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub redirect_url: Option<String>,
}

impl RemoteConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let non_empty = |key: &str| cfg.get(key).filter(|value| !value.trim().is_empty());
        Self {
            url: non_empty("remote.url"),
            anon_key: non_empty("remote.anon_key"),
            redirect_url: non_empty("auth.redirect_url"),
        }
    }
}

#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: Option<Url>,
    anon_key: String,
    pub redirect_url: Option<String>,
    storage: Arc<dyn LocalStorage>,
}

impl RemoteClient {
    pub fn new(config: RemoteConfig, storage: Arc<dyn LocalStorage>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed building HTTP client for the remote service")?;

        let base = config
            .url
            .as_deref()
            .map(|raw| {
                let normalized = if raw.ends_with('/') {
                    raw.to_string()
                } else {
                    format!("{raw}/")
                };
                Url::parse(&normalized).with_context(|| format!("invalid remote.url: {raw}"))
            })
            .transpose()?;

        if base.is_none() {
            warn!("remote.url is not configured; remote calls will fail");
        }

        Ok(Self {
            http,
            base,
            anon_key: config.anon_key.unwrap_or_default(),
            redirect_url: config.redirect_url,
            storage,
        })
    }

    pub fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| anyhow!("remote.url is not configured"))?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    pub fn access_token(&self) -> anyhow::Result<Option<String>> {
        self.storage.get_item(keys::AUTH_TOKEN)
    }

    pub fn store_access_token(&self, token: &str) -> anyhow::Result<()> {
        self.storage.set_item(keys::AUTH_TOKEN, token)
    }

    pub fn clear_access_token(&self) -> anyhow::Result<()> {
        self.storage.remove_item(keys::AUTH_TOKEN)
    }

    pub fn get(&self, url: Url) -> anyhow::Result<RequestBuilder> {
        self.authorized(self.http.get(url))
    }

    pub fn post(&self, url: Url) -> anyhow::Result<RequestBuilder> {
        self.authorized(self.http.post(url))
    }

    pub fn patch(&self, url: Url) -> anyhow::Result<RequestBuilder> {
        self.authorized(self.http.patch(url))
    }

    pub fn delete(&self, url: Url) -> anyhow::Result<RequestBuilder> {
        self.authorized(self.http.delete(url))
    }

    fn authorized(&self, request: RequestBuilder) -> anyhow::Result<RequestBuilder> {
        let bearer = self
            .access_token()?
            .unwrap_or_else(|| self.anon_key.clone());
        Ok(request
            .header("apikey", &self.anon_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {bearer}")))
    }
}

pub async fn send(request: RequestBuilder, operation: &'static str) -> anyhow::Result<Response> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{operation}: request failed"))?;

    let status = response.status();
    debug!(operation, status = status.as_u16(), "remote response");
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(MomentumError::backend(operation, status.as_u16(), error_message(&body)).into())
}

pub fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(text)) = map.get(key) {
                return text.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}
