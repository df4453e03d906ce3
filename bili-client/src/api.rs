//! HTTP access to the Bilibili content APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use bili_core::{ContentFetch, ResolveShortLink};

use crate::error::{ClientError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; BiliAnalysisBot/1.0)";
const REFERER: &str = "https://www.bilibili.com/";

/// Client for the Bilibili web APIs. Every API request carries the
/// anti-hotlinking headers, plus the session cookie when one is configured.
#[derive(Clone)]
pub struct BiliClient {
    http: reqwest::Client,
    cookie: String,
}

impl BiliClient {
    pub fn new(cookie: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            cookie: cookie.trim().to_string(),
        })
    }

    /// GET `url` with the API headers and parse the JSON body. Non-2xx
    /// statuses are errors.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.api_request(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Follows redirects for a shortened share link and hands back the final
    /// URL it landed on.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn expand_short_link(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        Ok(response.url().to_string())
    }

    pub(crate) fn api_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Referer", REFERER);
        if !self.cookie.is_empty() {
            request = request.header("Cookie", &self.cookie);
        }
        request
    }
}

#[async_trait]
impl ContentFetch for BiliClient {
    async fn fetch_json(&self, url: &str) -> anyhow::Result<Value> {
        Ok(self.get_json(url).await?)
    }
}

#[async_trait]
impl ResolveShortLink for BiliClient {
    async fn resolve(&self, url: &str) -> anyhow::Result<String> {
        Ok(self.expand_short_link(url).await?)
    }
}
