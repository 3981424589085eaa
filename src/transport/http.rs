use crate::core::error::{HttpError, TransportError};
use crate::transport::retry::{with_retry, Retry, RetryPolicy};
use reqwest::header::{HeaderMap, CONTENT_TYPE, SET_COOKIE};
use reqwest::multipart;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// A response body, parsed as JSON when it is JSON and kept as text otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Speculatively parse `raw` as JSON, falling back to the raw text
    pub fn parse(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(raw),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// Textual view of the body
    pub fn text(&self) -> String {
        match self {
            ResponseBody::Json(Value::String(s)) => s.clone(),
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Value of cookie `name` from this response's `Set-Cookie` headers
    pub fn cookie(&self, name: &str) -> Option<String> {
        cookie_from_headers(&self.headers, name)
    }
}

pub fn cookie_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}

/// One part of a multipart form
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
    Text { content_type: String, text: String },
    Multipart(Vec<FormPart>),
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    pub retry: Retry,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(Body::Form(fields));
        self
    }

    pub fn text(mut self, content_type: &str, text: String) -> Self {
        self.body = Some(Body::Text {
            content_type: content_type.to_string(),
            text,
        });
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = Some(Body::Multipart(parts));
        self
    }

    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.retry = retry.into();
        self
    }
}

/// Client-wide transport settings
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub retry: Option<RetryPolicy>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: Some(RetryPolicy::default()),
        }
    }
}

/// Thin HTTP client bound to one base address
///
/// Each adapter owns its own `HttpClient`; nothing (cookies included) is
/// shared between instances.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
    default_retry: Option<RetryPolicy>,
}

impl HttpClient {
    pub fn new(base_url: &str, settings: &TransportSettings) -> Result<Self, TransportError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            basic_auth: None,
            default_retry: settings.retry.clone(),
        })
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.basic_auth = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path);
        let policy = config.retry.clone().resolve(self.default_retry.as_ref());

        match policy {
            Some(policy) => with_retry(&policy, || self.send_once(method.clone(), &url, &config)).await,
            None => self.send_once(method, &url, &config).await,
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        config: &RequestConfig,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(method.clone(), url);

        if let Some((username, password)) = &self.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        for (name, value) in &config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            builder = builder.query(&config.query);
        }

        builder = match &config.body {
            None => builder,
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(fields)) => {
                let encoded = serde_urlencoded::to_string(fields)
                    .map_err(|e| TransportError::Network(format!("Failed to encode form: {}", e)))?;
                builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            Some(Body::Text { content_type, text }) => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(text.clone()),
            Some(Body::Multipart(parts)) => builder.multipart(build_multipart(parts)?),
        };

        trace!(method = %method, url = %url, "Sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let raw = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("Failed to read response body: {}", e)))?;
        let body = ResponseBody::parse(raw);

        if !status.is_success() {
            return Err(TransportError::Http(HttpError {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                headers,
                body,
            }));
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    pub async fn get(&self, path: &str, config: RequestConfig) -> Result<HttpResponse, TransportError> {
        self.request(Method::GET, path, config).await
    }

    pub async fn post(&self, path: &str, config: RequestConfig) -> Result<HttpResponse, TransportError> {
        self.request(Method::POST, path, config).await
    }

    pub async fn put(&self, path: &str, config: RequestConfig) -> Result<HttpResponse, TransportError> {
        self.request(Method::PUT, path, config).await
    }

    pub async fn patch(&self, path: &str, config: RequestConfig) -> Result<HttpResponse, TransportError> {
        self.request(Method::PATCH, path, config).await
    }

    pub async fn delete(&self, path: &str, config: RequestConfig) -> Result<HttpResponse, TransportError> {
        self.request(Method::DELETE, path, config).await
    }
}

fn build_multipart(parts: &[FormPart]) -> Result<multipart::Form, TransportError> {
    let mut form = multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                filename,
                mime,
                bytes,
            } => {
                let file = multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(mime)
                    .map_err(|e| TransportError::Network(format!("Invalid MIME type {}: {}", mime, e)))?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}
