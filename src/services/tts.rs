//! HTTP client for the speech synthesis server.
//!
//! `POST {tts_url}?character=<preset>` with `{"text": ..., "streaming": false}`; a 2xx body is
//! the complete WAV file.

use crate::error::ServiceError;
use crate::services::openai::check_status;
use crate::services::SpeechSynthesizer;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    streaming: bool,
}

pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    url: String,
    character: Option<String>,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, character: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            character: character.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest { text, streaming: false });

        if let Some(character) = &self.character {
            request = request.query(&[("character", character.as_str())]);
        }

        let response = check_status(request.send().await?).await?;
        let audio = response.bytes().await?;

        if audio.is_empty() {
            return Err(ServiceError::Decode("synthesis returned an empty body".to_string()));
        }

        debug!(bytes = audio.len(), "Received synthesized audio");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_synthesize_returns_body_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tts/"))
            .and(query_param("character", "wx"))
            .and(body_json(serde_json::json!({"text": "你好。", "streaming": false})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF....WAVE".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let tts = HttpSpeechSynthesizer::new(
            reqwest::Client::new(),
            format!("{}/tts/", server.uri()),
            Some("wx".to_string()),
        );
        assert_eq!(tts.synthesize("你好。").await.unwrap(), b"RIFF....WAVE".to_vec());
    }

    #[tokio::test]
    async fn test_synthesize_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tts = HttpSpeechSynthesizer::new(reqwest::Client::new(), server.uri(), None);
        assert!(matches!(
            tts.synthesize("hi").await,
            Err(ServiceError::Status { code: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_synthesize_transport_error() {
        // Nothing listens on port 9 of the loopback interface
        let tts = HttpSpeechSynthesizer::new(reqwest::Client::new(), "http://127.0.0.1:9/tts/", None);
        assert!(matches!(tts.synthesize("hi").await, Err(ServiceError::Transport(_))));
    }
}
