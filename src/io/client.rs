//! HTTP client for the visitor API, used by `visitorctl` and integration tests

use crate::domain::types::{NewVisitor, Visitor, VisitorId};
use anyhow::{anyhow, Context};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::form_urlencoded;

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// `base_url` is scheme and authority, e.g. `http://127.0.0.1:8080`
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .http1_only()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn url_with_param(&self, path: &str, key: &str, value: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new()).append_pair(key, value).finish();
        format!("{}{}?{}", self.base_url, path, query)
    }

    pub async fn add_visitor(&self, visitor: &NewVisitor) -> anyhow::Result<Visitor> {
        let body = serde_json::to_vec(visitor).context("failed to encode visitor")?;
        let resp = self
            .http
            .post(self.url("/api/resident/addVisitor"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("addVisitor request failed")?;
        decode(resp).await
    }

    pub async fn list_visitors(&self) -> anyhow::Result<Vec<Visitor>> {
        let resp = self
            .http
            .get(self.url("/api/resident/viewVisitors"))
            .send()
            .await
            .context("viewVisitors request failed")?;
        decode(resp).await
    }

    pub async fn scan(&self, token: &str) -> anyhow::Result<Option<Visitor>> {
        let path = format!("/api/security/scan/{}", utf8_percent_encode(token, NON_ALPHANUMERIC));
        let resp = self.http.get(self.url(&path)).send().await.context("scan request failed")?;
        decode_optional(resp).await
    }

    pub async fn validate_otp(&self, otp: &str) -> anyhow::Result<Option<Visitor>> {
        let resp = self
            .http
            .post(self.url_with_param("/api/security/validateOtp", "otp", otp))
            .send()
            .await
            .context("validateOtp request failed")?;
        decode_optional(resp).await
    }

    /// Returns false when no visitor has this id
    pub async fn mark_arrived(&self, id: VisitorId) -> anyhow::Result<bool> {
        let resp = self
            .http
            .put(self.url(&format!("/api/security/markArrived/{id}")))
            .send()
            .await
            .context("markArrived request failed")?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from(resp).await),
        }
    }

    pub async fn search(&self, name: &str) -> anyhow::Result<Option<Visitor>> {
        let resp = self
            .http
            .get(self.url_with_param("/api/security/search", "name", name))
            .send()
            .await
            .context("search request failed")?;
        decode_optional(resp).await
    }

    pub async fn search_all(&self, name: &str) -> anyhow::Result<Vec<Visitor>> {
        let resp = self
            .http
            .get(self.url_with_param("/api/security/searchAll", "name", name))
            .send()
            .await
            .context("searchAll request failed")?;
        decode(resp).await
    }

    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.http.get(self.url("/health")).send().await.context("health request failed")?;
        Ok(resp.status().is_success())
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> anyhow::Result<T> {
    if !resp.status().is_success() {
        return Err(error_from(resp).await);
    }
    let body = resp.bytes().await.context("failed to read response body")?;
    serde_json::from_slice(&body).context("failed to decode response body")
}

async fn decode_optional<T: DeserializeOwned>(resp: Response) -> anyhow::Result<Option<T>> {
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    decode(resp).await.map(Some)
}

/// Turn an error response into an `anyhow::Error` carrying the server's message
async fn error_from(resp: Response) -> anyhow::Error {
    let status = resp.status();
    let message = match resp.bytes().await {
        Ok(body) => serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned()),
        Err(e) => e.to_string(),
    };
    anyhow!("server returned {status}: {message}")
}
