use std::time::Duration;

use anyhow::{bail, Context, Result};
use montage_contracts::Settings;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::ACCEPT;
use serde_json::Value;

/// Status line and body of one HTTP exchange, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The service signals success with exactly 200; other 2xx codes are failures.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Transport to the generation service. Every call carries its own timeout.
pub trait GenerationApi: Send + Sync {
    fn submit(&self, payload: &Value, timeout: Duration) -> Result<HttpReply>;
    fn query(&self, task_id: &str, timeout: Duration) -> Result<HttpReply>;
}

pub struct HttpGenerationApi {
    generation_url: String,
    query_url: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpGenerationApi {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            generation_url: settings.generation_url.clone(),
            query_url: settings.query_url.clone(),
            api_key: settings.api_key.clone(),
            http,
        })
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl GenerationApi for HttpGenerationApi {
    fn submit(&self, payload: &Value, timeout: Duration) -> Result<HttpReply> {
        let request = self
            .http
            .post(&self.generation_url)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .json(payload);
        let response = self
            .authorize(request)
            .send()
            .with_context(|| format!("generation request failed ({})", self.generation_url))?;
        reply_from_response("generation", response)
    }

    fn query(&self, task_id: &str, timeout: Duration) -> Result<HttpReply> {
        let request = self
            .http
            .get(&self.query_url)
            .header(ACCEPT, "application/json")
            .query(&[("task_id", task_id)])
            .timeout(timeout);
        let response = self
            .authorize(request)
            .send()
            .with_context(|| format!("task query failed ({})", self.query_url))?;
        reply_from_response("task query", response)
    }
}

fn reply_from_response(label: &str, response: HttpResponse) -> Result<HttpReply> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    Ok(HttpReply { status, body })
}

/// Parses a successful reply as JSON, failing with a truncated body otherwise.
pub(crate) fn reply_json(label: &str, reply: &HttpReply) -> Result<Value> {
    if !reply.is_success() {
        bail!(
            "{label} request failed ({}): {}",
            reply.status,
            truncate_text(reply.body.trim(), 240)
        );
    }
    let parsed: Value = serde_json::from_str(&reply.body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn transport_failure_kind(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        let reqwest_err = cause.downcast_ref::<reqwest::Error>()?;
        if reqwest_err.is_timeout() {
            Some("timeout")
        } else if reqwest_err.is_connect() {
            Some("connect")
        } else if reqwest_err.is_request() {
            Some("request")
        } else {
            None
        }
    })
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if let Some(kind) = transport_failure_kind(err) {
        parts.insert(0, format!("[{kind}]"));
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
