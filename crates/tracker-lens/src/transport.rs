//! Transport contract and the reqwest-backed client.
//!
//! The engine never opens a socket itself: every request goes through a
//! [`Transport`]. Anti-bot bypass tokens come from a [`BypassTokenProvider`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::types::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    Form(Vec<(String, String)>),
    Json(Value),
}

/// Fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            query: Vec::new(),
            body: RequestBody::None,
            headers: Vec::new(),
        }
    }

    /// URL with `query` appended to any query the URL already carries.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace any header called `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// Response as seen by the engine.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// First header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Performs one HTTP exchange. Implementations must not replay requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse>;
}

/// Credentials that let a request through an anti-bot challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassToken {
    /// `name=value` pairs to merge into the `Cookie` header.
    pub cookie: String,
    /// User agent the token was issued for, if it is bound to one.
    pub user_agent: Option<String>,
}

/// External collaborator that obtains and forgets bypass tokens.
#[async_trait]
pub trait BypassTokenProvider: Send + Sync {
    async fn acquire(&self, url: &Url) -> EngineResult<BypassToken>;
    async fn clear(&self, url: &Url) -> EngineResult<()>;
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Safari/537.36"
        .to_string()
}

fn default_max_redirects() -> usize {
    5
}

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// HTTP transport wrapping reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> EngineResult<Self> {
        let build = |http1_only: bool| {
            let mut builder = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
                .user_agent(config.user_agent.as_str());
            if http1_only {
                builder = builder.http1_only();
            }
            builder
                .build()
                .map_err(|e| EngineError::Transport(format!("cannot build client: {e}")))
        };

        Ok(Self {
            client: build(false)?,
            h1_client: build(true)?,
        })
    }

    async fn send_with(
        &self,
        client: &reqwest::Client,
        request: &HttpRequest,
    ) -> Result<HttpResponse, reqwest::Error> {
        let url = request.full_url();
        let mut builder = match request.method {
            HttpMethod::Get => client.get(url.clone()),
            HttpMethod::Post => client.post(url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
        };

        let r = builder.send().await?;
        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let headers = r
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = r.text().await?;

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse> {
        match self.send_with(&self.client, &request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    tracing::debug!(url = %request.url, "retrying over HTTP/1.1: {err_str}");
                    self.send_with(&self.h1_client, &request)
                        .await
                        .map_err(|e| EngineError::Transport(e.to_string()))
                } else {
                    Err(EngineError::Transport(err_str))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_url_appends_query() {
        let mut req = HttpRequest::get(Url::parse("https://example.org/torrents.php?a=1").unwrap());
        req.query.push(("search".into(), "foo bar".into()));
        assert_eq!(
            req.full_url().as_str(),
            "https://example.org/torrents.php?a=1&search=foo+bar"
        );
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut req = HttpRequest::get(Url::parse("https://example.org/").unwrap());
        req.set_header("cookie", "a=1");
        req.set_header("Cookie", "b=2");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("COOKIE"), Some("b=2"));
    }

    #[test]
    fn test_transport_config_defaults() {
        let config: TransportConfig = serde_json::from_str("{\"timeout_ms\": 500}").unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.max_redirects, 5);
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_method_accepts_both_cases() {
        let m: HttpMethod = serde_json::from_str("\"post\"").unwrap();
        assert_eq!(m, HttpMethod::Post);
        let m: HttpMethod = serde_json::from_str("\"GET\"").unwrap();
        assert_eq!(m, HttpMethod::Get);
    }
}
