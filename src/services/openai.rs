//! OpenAI-compatible chat-completions client (Ollama, vLLM, OpenAI itself).
//!
//! Requests go to `{base_url}/chat/completions` with `stream: true`. The SSE body is decoded
//! incrementally and each `choices[0].delta.content` fragment becomes one token.
//!
//! The body is read only as fast as the pipeline consumes sentences, so a reply can stay open
//! for as long as it takes to play. The client used here must not carry a total request
//! timeout; only connecting and waiting for the response headers are bounded.

use crate::error::ServiceError;
use crate::services::sse::{self, SseDecoder};
use crate::services::{ChatMessage, LanguageModel, TokenStream};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings shared by the reply and classification clients.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Turn a non-success response into a [`ServiceError::Status`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status { code: status.as_u16(), body })
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Pull the text fragment out of one `data:` payload. Role-only or empty deltas yield `None`.
pub fn parse_delta(data: &str) -> Result<Option<String>, ServiceError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ServiceError::Decode(format!("bad stream chunk: {}", e)))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// HTTP client for streamed replies: bounded connect, unbounded body.
pub fn streaming_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().connect_timeout(connect_timeout).build()
}

pub struct OpenAiChatClient {
    client: reqwest::Client,
    config: OpenAiConfig,
    response_timeout: Option<Duration>,
}

impl OpenAiChatClient {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self {
            client,
            config,
            response_timeout: None,
        }
    }

    /// Bound the wait for the response headers. Reading the body stays unbounded.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    ready: VecDeque<Result<String, ServiceError>>,
    finished: bool,
}

impl StreamState {
    fn accept(&mut self, payloads: Vec<String>) {
        for data in payloads {
            if sse::is_done(&data) {
                self.finished = true;
                continue;
            }
            match parse_delta(&data) {
                Ok(Some(token)) => self.ready.push_back(Ok(token)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping undecodable stream chunk: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, ServiceError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
        });

        debug!(model = %self.config.model, messages = messages.len(), "Requesting streamed reply");

        let request = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();
        let response = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ServiceError::Transport(format!("no response within {:?}", limit)))??,
            None => request.await?,
        };
        let response = check_status(response).await?;

        let state = StreamState {
            body: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            finished: false,
        };

        let tokens = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        let payloads = state.decoder.push(&chunk);
                        state.accept(payloads);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(ServiceError::Transport(e.to_string())), state));
                    }
                    None => {
                        let tail = state.decoder.finish();
                        state.accept(tail.into_iter().collect());
                        state.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(tokens))
    }
}
