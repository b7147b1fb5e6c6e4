// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use news_interceptor::capture::{HttpRequest, HttpResponse, Transport};
use news_interceptor::error::FetchError;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Mutex;

/// Canned responses keyed by URL substring; records every request URL.
#[derive(Default)]
pub struct StubTransport {
    routes: Vec<(String, u16, Vec<u8>)>,
    pub seen: Mutex<Vec<String>>,
    pub fail: HashMap<String, String>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, needle: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((needle.to_string(), status, body.as_bytes().to_vec()));
        self
    }

    pub fn failing(mut self, needle: &str, msg: &str) -> Self {
        self.fail.insert(needle.to_string(), msg.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.seen.lock().unwrap().push(req.url.clone());
        if let Some((_, msg)) = self.fail.iter().find(|(n, _)| req.url.contains(n.as_str())) {
            return Err(FetchError::Unavailable(msg.clone()));
        }
        let (status, body) = self
            .routes
            .iter()
            .find(|(n, _, _)| req.url.contains(n.as_str()))
            .map(|(_, s, b)| (*s, b.clone()))
            .unwrap_or((404, b"{}".to_vec()));
        Ok(HttpResponse {
            status,
            url: req.url,
            headers: HeaderMap::new(),
            body,
        })
    }
}

pub const BBG_LIST: &str =
    "https://www.bloomberg.com/lineup-next/api/stories?types=ARTICLE&locale=en&page=1&limit=25";

pub const BBG_BODY: &str = r#"[
    {"publishedAt": "2024-05-01T10:00:00Z", "brand": "markets", "headline": "Oil rises"},
    {"publishedAt": "2024-05-01T09:00:00Z", "brand": "markets", "headline": ""}
]"#;
