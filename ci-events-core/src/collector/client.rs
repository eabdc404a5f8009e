//! Transport to the collector's events API
//!
//! The delivery worker only sees the [`Transport`] trait: one blocking
//! request in, one status code out. [`HttpTransport`] is the production
//! implementation on top of a blocking reqwest client.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::error::{Error, Result};

use super::events::EventsBatch;
use super::server::EndpointConfig;

/// A fully built request to the collector
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Request {
    /// PUT the serialized batch to the endpoint's events URL
    pub fn events(endpoint: &EndpointConfig, batch: &EventsBatch) -> Result<Self> {
        Ok(Self {
            method: Method::PUT,
            url: endpoint.events_url(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: batch.to_json()?,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body returned by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Option<String>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Only a plain 200 counts as delivered
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Performs one synchronous request
///
/// `Ok` carries any status, including failures the worker will retry.
/// `Err` means the request could not be completed at all; the worker drops
/// the batch instead of retrying.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &Request) -> Result<Response>;
}

/// Blocking HTTP transport
///
/// Must not be driven from inside an async runtime's worker thread; the
/// delivery worker runs it on its own OS thread.
pub struct HttpTransport {
    http_client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request) -> Result<Response> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Transport(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Transport(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let response = self
            .http_client
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()?;

        let status = response.status().as_u16();
        let body = response.text().ok().filter(|text| !text.is_empty());

        tracing::debug!(url = %request.url, status, "Collector responded");

        Ok(Response { status, body })
    }
}
