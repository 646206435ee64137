//! HTTP transport boundary.
//!
//! Platform clients build [`HttpRequest`]s and hand them to an
//! [`HttpTransport`]. Production uses [`reqwest_transport::ReqwestTransport`];
//! unit tests use the in-memory `MockTransport`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
        }
    }
}

/// Header pairs. Lookups are case-insensitive.
pub type HttpHeaders = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in seconds, when the server sent the delta-seconds form.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Body as text, lossy, truncated to `max_chars` for error messages.
    pub fn body_snippet(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let mut snippet: String = text.chars().take(max_chars).collect();
        if text.chars().count() > max_chars {
            snippet.push_str("...");
        }
        snippet
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// First header value matching `name`, case-insensitively.
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(feature = "azure")]
pub mod reqwest_transport {
    use super::*;

    /// Transport backed by a shared `reqwest::Client`.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("devpulse/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    fn transport_error(e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout
        } else {
            HttpError::Transport(e.to_string())
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
            };

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in request.headers {
                builder = builder.header(name, value);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body);
            }

            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await.map_err(transport_error)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Scripted transport: responses are queued per method and URL.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        routes: HashMap<(HttpMethod, String), VecDeque<Result<HttpResponse, String>>>,
        requests: Vec<HttpRequest>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_response(&self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) {
            self.inner
                .lock()
                .unwrap()
                .routes
                .entry((method, url.into()))
                .or_default()
                .push_back(Ok(response));
        }

        /// Queue a JSON body with the given status for a GET.
        pub fn push_json(&self, url: impl Into<String>, status: u16, body: serde_json::Value) {
            self.push_response(
                HttpMethod::Get,
                url,
                HttpResponse {
                    status,
                    headers: vec![("Content-Type".into(), "application/json".into())],
                    body: serde_json::to_vec(&body).unwrap(),
                },
            );
        }

        /// Queue a transport failure for a GET.
        pub fn push_failure(&self, url: impl Into<String>, message: &str) {
            self.inner
                .lock()
                .unwrap()
                .routes
                .entry((HttpMethod::Get, url.into()))
                .or_default()
                .push_back(Err(message.to_string()));
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.inner.lock().unwrap().requests.clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut inner = self.inner.lock().unwrap();
            let key = (request.method, request.url.clone());
            inner.requests.push(request);

            match inner.routes.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(HttpError::Transport(message)),
                None => Err(HttpError::NoMockResponse {
                    method: key.0.as_str().to_string(),
                    url: key.1,
                }),
            }
        }
    }
}
