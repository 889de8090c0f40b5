use std::time::Duration;

use async_trait::async_trait;
use atelier_contracts::{DispatchError, Result};
use reqwest::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::Client as HttpClient;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallBody {
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartBody {
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One outbound provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub provider: &'static str,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub timeout: Duration,
    pub body: CallBody,
}

impl HttpCall {
    pub fn get(provider: &'static str, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            timeout,
            body: CallBody::Empty,
        }
    }

    pub fn post(
        provider: &'static str,
        url: impl Into<String>,
        timeout: Duration,
        body: CallBody,
    ) -> Self {
        Self {
            provider,
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            timeout,
            body,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

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

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends the calls backend adapters describe as [`HttpCall`]s.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Exceeding `call.timeout` is a hard `Transport` failure, never retried.
    async fn send(&self, call: HttpCall) -> Result<HttpReply>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_form(body: MultipartBody, provider: &'static str) -> Result<MultipartForm> {
        let mut form = MultipartForm::new();
        for (name, value) in body.fields {
            form = form.text(name, value);
        }
        for file in body.files {
            let part = MultipartPart::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime_type)
                .map_err(|err| DispatchError::Transport {
                    provider,
                    detail: format!("invalid mime '{}': {err}", file.mime_type),
                })?;
            form = form.part(file.field, part);
        }
        Ok(form)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, call: HttpCall) -> Result<HttpReply> {
        let provider = call.provider;
        let mut builder = match call.method {
            Method::Get => self.http.get(&call.url),
            Method::Post => self.http.post(&call.url),
        }
        .timeout(call.timeout);
        for (name, value) in &call.headers {
            builder = builder.header(*name, value);
        }
        builder = match call.body {
            CallBody::Empty => builder,
            CallBody::Json(payload) => builder.json(&payload),
            CallBody::Multipart(body) => builder.multipart(Self::build_form(body, provider)?),
        };

        tracing::debug!(provider, url = %redact_url(&call.url), "sending provider request");
        let response = builder.send().await.map_err(|err| DispatchError::Transport {
            provider,
            detail: describe_reqwest_error(&err, &call.url),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| DispatchError::Transport {
            provider,
            detail: format!("response body read failed: {}", err.without_url()),
        })?;
        Ok(HttpReply { status, body })
    }
}

fn describe_reqwest_error(err: &reqwest::Error, url: &str) -> String {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    format!("{kind} ({})", redact_url(url))
}

/// Parses a 2xx JSON body; anything else becomes `UpstreamError` with the
/// body kept verbatim.
pub fn json_or_upstream(provider: &'static str, reply: HttpReply) -> Result<Value> {
    if !reply.is_success() {
        tracing::warn!(
            provider,
            status = reply.status,
            body = %truncate_text(&reply.body, 512),
            "provider returned an error status"
        );
        return Err(DispatchError::UpstreamError {
            provider,
            status: reply.status,
            body: reply.body,
        });
    }
    serde_json::from_str(&reply.body).map_err(|err| DispatchError::InvalidResponse {
        provider,
        detail: format!("invalid JSON payload: {err}"),
    })
}

/// Drops the query string so API keys never reach logs.
pub fn redact_url(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
