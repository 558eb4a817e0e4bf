use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{ChatError, ChatErrorCode};
use crate::transport::ChunkSource;
use crate::transport_retry::{DEFAULT_TRANSPORT_RETRY_COUNT, retry_transport_operation_async};
use crate::types::{ChatRequest, Document, DocumentSummary};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8888";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DOCUMENT_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClientConfig {
    pub base_url: String,
    /// Applies to document requests only; chat streams use the idle timeout.
    pub request_timeout: Duration,
    /// Longest silence tolerated between two chunks of a chat stream.
    pub stream_idle_timeout: Duration,
    pub transport_retry_count: usize,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            transport_retry_count: DEFAULT_TRANSPORT_RETRY_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    config: ChatClientConfig,
    http: Client,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Self {
        let http = build_http_client(&config.base_url);
        Self { config, http }
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    /// Posts a question. `Ok(None)` means the server answered without a body.
    pub async fn open_chat(&self, request: &ChatRequest) -> Result<Option<HttpBody>, ChatError> {
        let url = self.endpoint(&["chat"])?;
        tracing::info!(
            mode = request.mode.as_str(),
            history = request.history.len(),
            "opening chat stream"
        );
        let response = self
            .prepare(self.http.post(url))
            .header("accept", "application/x-ndjson")
            .json(request)
            .send()
            .await
            .map_err(|error| ChatError::transport(format!("chat transport failed: {error}")))?;
        let response = ensure_success(response).await?;
        Ok(HttpBody::from_response(
            response,
            self.config.stream_idle_timeout,
        ))
    }

    pub async fn list_documents(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<DocumentSummary>, ChatError> {
        let url = self.endpoint(&["documents"])?;
        let limit = limit.to_string();
        retry_transport_operation_async(self.config.transport_retry_count, || {
            let request = self
                .prepare(self.http.get(url.clone()))
                .query(&[("q", query), ("limit", limit.as_str())])
                .timeout(self.config.request_timeout);
            fetch_json(request, "documents")
        })
        .await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, ChatError> {
        let url = self.endpoint(&["document", id])?;
        retry_transport_operation_async(self.config.transport_retry_count, || {
            let request = self
                .prepare(self.http.get(url.clone()))
                .timeout(self.config.request_timeout);
            fetch_json(request, "document")
        })
        .await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|error| {
            ChatError::new(
                ChatErrorCode::InvalidInput,
                format!("invalid base url {}: {error}", self.config.base_url),
            )
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ChatError::new(
                    ChatErrorCode::InvalidInput,
                    format!("base url cannot carry a path: {}", self.config.base_url),
                )
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("ngrok-skip-browser-warning", "true")
    }
}

/// Chat response body read chunk by chunk.
pub struct HttpBody {
    response: Response,
    idle_timeout: Duration,
}

impl HttpBody {
    pub fn from_response(response: Response, idle_timeout: Duration) -> Option<Self> {
        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return None;
        }
        Some(Self {
            response,
            idle_timeout,
        })
    }
}

#[async_trait]
impl ChunkSource for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        match tokio::time::timeout(self.idle_timeout, self.response.chunk()).await {
            Ok(Ok(chunk)) => Ok(chunk.map(|bytes| bytes.to_vec())),
            Ok(Err(error)) => Err(ChatError::transport(format!(
                "chat stream read failed: {error}"
            ))),
            Err(_) => Err(ChatError::transport(format!(
                "chat stream idle for more than {}s",
                self.idle_timeout.as_secs()
            ))),
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    what: &str,
) -> Result<T, ChatError> {
    let response = request
        .send()
        .await
        .map_err(|error| ChatError::transport(format!("{what} transport failed: {error}")))?;
    let response = ensure_success(response).await?;
    let body = response
        .text()
        .await
        .map_err(|error| ChatError::transport(format!("{what} read failed: {error}")))?;
    serde_json::from_str(&body).map_err(|error| {
        ChatError::parse(format!("invalid {what} payload: {error}"))
            .with_details(json!({ "bodyPrefix": body.chars().take(400).collect::<String>() }))
    })
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_string());
    Err(
        ChatError::new(ChatErrorCode::Http, format!("HTTP {status}: {body}"))
            .with_details(json!({ "status": status })),
    )
}

fn build_http_client(base_url: &str) -> Client {
    if is_loopback_base_url(base_url) {
        Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new())
    } else {
        Client::new()
    }
}

fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "[::1]"
}
