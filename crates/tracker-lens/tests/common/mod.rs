//! Shared fixtures: a scripted transport and a counting bypass provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracker_lens::{
    BypassToken, BypassTokenProvider, EngineError, EngineResult, HttpRequest, HttpResponse, Site,
    SiteDefinition, Transport,
};
use url::Url;

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn sent(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse> {
        let url = request.full_url().to_string();
        self.requests.lock().unwrap().push(request);
        let mut response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Transport("script exhausted".into()))?;
        response.url = url.clone();
        if response.final_url.is_empty() {
            response.final_url = url;
        }
        Ok(response)
    }
}

pub fn ok(body: &str) -> HttpResponse {
    HttpResponse {
        url: String::new(),
        final_url: String::new(),
        status: 200,
        headers: vec![("content-type".into(), "text/html".into())],
        body: body.to_string(),
    }
}

pub fn challenge() -> HttpResponse {
    HttpResponse {
        url: String::new(),
        final_url: String::new(),
        status: 503,
        headers: vec![("server".into(), "cloudflare".into())],
        body: "<html><title>Just a moment...</title></html>".into(),
    }
}

/// Hands out a fixed token and counts calls.
#[derive(Default)]
pub struct CountingBypass {
    pub acquired: AtomicUsize,
    pub cleared: AtomicUsize,
}

impl CountingBypass {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BypassTokenProvider for CountingBypass {
    async fn acquire(&self, _url: &Url) -> EngineResult<BypassToken> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(BypassToken {
            cookie: "cf_clearance=token".into(),
            user_agent: Some("TestAgent/1.0".into()),
        })
    }

    async fn clear(&self, _url: &Url) -> EngineResult<()> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn site(spec: Value) -> Site {
    let definition = SiteDefinition::from_json(&spec.to_string()).unwrap();
    Site::new(definition)
}

/// Padding that keeps bodies clear of the short-body login heuristic.
pub fn padding() -> String {
    format!("<!-- {} -->", "x".repeat(1000))
}
