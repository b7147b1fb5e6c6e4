// src/capture/client.rs
//! Hookable HTTP client: the host-provided registration point for interceptors.
//!
//! Callers use `fetch` (awaited) or `xhr` (load event delivered on a one-shot
//! channel). Both go through the same [`Transport`] untouched; registered
//! interceptors only observe the response bytes.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::interceptor::NetworkInterceptor;
use super::types::{CaptureMethod, CaptureRequest};
use crate::error::{CaptureError, FetchError};

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Fully buffered response, handed back to the caller exactly as received.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The underlying HTTP primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse, FetchError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self
            .client
            .request(req.method, &req.url)
            .headers(req.headers)
            .timeout(self.timeout);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let rsp = builder.send().await?;
        let status = rsp.status().as_u16();
        let url = rsp.url().to_string();
        let headers = rsp.headers().clone();
        let body = rsp.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

pub struct HookedClient<T: Transport> {
    transport: T,
    interceptors: Vec<Arc<NetworkInterceptor>>,
}

impl<T: Transport + 'static> HookedClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            interceptors: Vec::new(),
        }
    }

    /// Register an interceptor. Every later request is offered to it.
    pub fn register(&mut self, interceptor: Arc<NetworkInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn interceptors(&self) -> &[Arc<NetworkInterceptor>] {
        &self.interceptors
    }

    /// Awaited primitive. Transport errors come back untouched.
    pub async fn fetch(&self, req: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.run(req, CaptureMethod::Fetch).await
    }

    /// Event-style primitive: the response (or error) arrives on the returned
    /// receiver once the request has loaded.
    pub fn xhr(self: &Arc<Self>, req: HttpRequest) -> oneshot::Receiver<Result<HttpResponse, FetchError>> {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let res = this.run(req, CaptureMethod::Xhr).await;
            let _ = tx.send(res);
        });
        rx
    }

    async fn run(&self, req: HttpRequest, method: CaptureMethod) -> Result<HttpResponse, FetchError> {
        let targets: Vec<&Arc<NetworkInterceptor>> = self
            .interceptors
            .iter()
            .filter(|i| i.is_target(&req.url))
            .collect();
        let observed = CaptureRequest::new(req.url.clone(), method);

        let rsp = self.transport.execute(req).await?;

        for interceptor in targets {
            if let Err(e) = interceptor.capture(&observed, &rsp.body) {
                log_capture_error(interceptor.name(), &observed.url, &e);
            }
        }
        Ok(rsp)
    }
}

fn log_capture_error(source: &str, url: &str, e: &CaptureError) {
    if e.is_duplicate() {
        tracing::debug!(target: "capture", source, url, reason = %e, "skipped duplicate");
    } else {
        tracing::error!(target: "capture", source, url, error = %e, "capture dropped");
    }
}
