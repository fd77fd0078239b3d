//! Login-wall and anti-bot detection with a single bounded replay.

use serde::Deserialize;

use crate::document::{Document, DocumentKind};
use crate::state::Pattern;
use crate::transport::{BypassTokenProvider, HttpRequest, HttpResponse, Transport};
use crate::types::{EngineError, EngineResult};

/// Body markers only interstitial challenge pages carry.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "<title>Just a moment...</title>",
];

/// Proxy script paths that also appear on ordinary pages; they count only
/// on 403/503 answers.
const CHALLENGE_SCRIPTS: &[&str] = &["challenge-platform", "ddos-guard.net/js"];

/// `server` header values of proxies that answer with challenge pages.
const CHALLENGE_SERVERS: &[&str] = &["cloudflare", "ddos-guard"];

fn default_url_patterns() -> Vec<Pattern> {
    ["(?i)(?:log|sign)[-_]?in", "(?i)takelogin|returnto="]
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
}

fn default_keywords() -> Vec<String> {
    ["login", "log in", "sign in", "登录", "登錄"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_short_body() -> usize {
    800
}

/// How a site's login wall looks.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginCheck {
    /// Matched against the final URL and any `refresh` redirect target.
    #[serde(default = "default_url_patterns")]
    pub url_patterns: Vec<Pattern>,
    /// Case-insensitive keywords searched for in the text of short markup
    /// bodies. JSON bodies are never keyword-checked.
    #[serde(default = "default_keywords")]
    pub body_keywords: Vec<String>,
    /// Bodies shorter than this many characters are keyword-checked.
    #[serde(default = "default_short_body")]
    pub short_body: usize,
}

impl Default for LoginCheck {
    fn default() -> Self {
        Self {
            url_patterns: default_url_patterns(),
            body_keywords: default_keywords(),
            short_body: default_short_body(),
        }
    }
}

impl LoginCheck {
    /// True when `response`, expected to be a `kind` document, is an
    /// authentication wall instead of content.
    pub fn is_login_wall(&self, response: &HttpResponse, kind: DocumentKind) -> bool {
        let url_hit = |url: &str| self.url_patterns.iter().any(|p| p.is_match(url));

        if response.final_url != response.url && url_hit(&response.final_url) && !url_hit(&response.url) {
            return true;
        }

        if let Some(refresh) = response.header("refresh") {
            if url_hit(refresh) {
                return true;
            }
        }

        if kind == DocumentKind::Html && response.body.chars().count() < self.short_body {
            let text = Document::parse_html(&response.body).root().text().to_lowercase();
            return self
                .body_keywords
                .iter()
                .any(|k| text.contains(&k.to_lowercase()));
        }
        false
    }
}

/// True when `response` is an anti-bot challenge page.
pub fn is_challenge(response: &HttpResponse) -> bool {
    if response
        .header("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return true;
    }

    if matches!(response.status, 403 | 503) {
        let proxied = response.header("server").is_some_and(|server| {
            let server = server.to_ascii_lowercase();
            CHALLENGE_SERVERS.iter().any(|s| server.contains(s))
        });
        if proxied || CHALLENGE_SCRIPTS.iter().any(|m| response.body.contains(m)) {
            return true;
        }
    }

    CHALLENGE_MARKERS.iter().any(|m| response.body.contains(m))
}

/// Merge `extra` cookie pairs into `existing`; `extra` wins on name clashes.
pub fn merge_cookies(existing: Option<&str>, extra: &str) -> String {
    let pairs = |s: &str| -> Vec<(String, String)> {
        s.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect()
    };

    let mut merged = existing.map(pairs).unwrap_or_default();
    for (name, value) in pairs(extra) {
        match merged.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => merged.push((name, value)),
        }
    }
    merged
        .iter()
        .map(|(n, v)| format!("{n}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sends requests for one site with cookie attachment, challenge recovery
/// and login-wall detection.
pub struct ResilientFetcher<'a> {
    pub transport: &'a dyn Transport,
    pub bypass: Option<&'a dyn BypassTokenProvider>,
    pub login: &'a LoginCheck,
    pub site_id: &'a str,
    pub cookie: Option<&'a str>,
}

impl ResilientFetcher<'_> {
    /// Send `request`, replaying it at most once behind a bypass token.
    ///
    /// `kind` is the document the caller expects back.
    pub async fn fetch(
        &self,
        mut request: HttpRequest,
        kind: DocumentKind,
    ) -> EngineResult<HttpResponse> {
        if let Some(cookie) = self.cookie {
            let merged = merge_cookies(request.header("cookie"), cookie);
            request.set_header("Cookie", merged);
        }

        let mut response = self.transport.send(request.clone()).await?;

        if is_challenge(&response) {
            let Some(provider) = self.bypass else {
                tracing::warn!(site = self.site_id, url = %request.url, "anti-bot challenge, no bypass provider");
                return Err(EngineError::Blocked {
                    url: request.url.to_string(),
                });
            };

            tracing::info!(site = self.site_id, url = %request.url, "anti-bot challenge, replaying with bypass token");
            let token = provider.acquire(&request.url).await?;
            let merged = merge_cookies(request.header("cookie"), &token.cookie);
            request.set_header("Cookie", merged);
            if let Some(ua) = &token.user_agent {
                request.set_header("User-Agent", ua.as_str());
            }

            response = self.transport.send(request.clone()).await?;
            if is_challenge(&response) {
                tracing::warn!(site = self.site_id, url = %request.url, "still blocked after replay");
                if let Err(e) = provider.clear(&request.url).await {
                    tracing::warn!(site = self.site_id, "failed to clear bypass token: {e}");
                }
                return Err(EngineError::Blocked {
                    url: request.url.to_string(),
                });
            }
        }

        if self.login.is_login_wall(&response, kind) {
            tracing::info!(site = self.site_id, url = %response.final_url, "login wall detected");
            return Err(EngineError::NotAuthenticated {
                site: self.site_id.to_string(),
            });
        }

        Ok(response)
    }
}
