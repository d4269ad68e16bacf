//! Emotion classification through a chat model with a forced function call.
//!
//! The model must call `get_emotion` with one of the five labels. The first tool call's
//! `emotion` argument is parsed; any other answer is reported as a decode error and the
//! caller falls back to neutral.

use crate::error::ServiceError;
use crate::pipeline::types::EmotionTag;
use crate::services::openai::{check_status, OpenAiConfig};
use crate::services::EmotionClassifier;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const CLASSIFIER_PROMPT: &str = "你是一个专业的情感分析专家，请根据当前句子的情感，判断出情感类型，\
必须是以下之一：'neutral', 'happy', 'angry', 'sad', 'relaxed'，并调用对应的函数作为参数返回。";

pub struct LlmEmotionClassifier {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl LlmEmotionClassifier {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": CLASSIFIER_PROMPT},
                {"role": "user", "content": format!("当前句子: {}", text)},
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_emotion",
                    "description": "判断当前句子的情感，作为虚拟主播的语气和表情",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "emotion": {
                                "type": "string",
                                "enum": EmotionTag::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                            }
                        },
                        "required": ["emotion"],
                    }
                }
            }],
            "tool_choice": "required",
            "stream": false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct EmotionArguments {
    emotion: String,
}

/// Extract the tag from a completion body.
pub fn parse_emotion_response(body: &str) -> Result<EmotionTag, ServiceError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::Decode(format!("bad completion body: {}", e)))?;

    let call = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.tool_calls.into_iter().next())
        .ok_or_else(|| ServiceError::Decode("model did not call get_emotion".to_string()))?;

    let arguments: EmotionArguments = serde_json::from_str(&call.function.arguments)
        .map_err(|e| ServiceError::Decode(format!("bad get_emotion arguments: {}", e)))?;

    EmotionTag::from_label(&arguments.emotion)
        .ok_or_else(|| ServiceError::Decode(format!("unrecognized emotion '{}'", arguments.emotion)))
}

#[async_trait]
impl EmotionClassifier for LlmEmotionClassifier {
    async fn classify(&self, text: &str) -> Result<EmotionTag, ServiceError> {
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(text))
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        let tag = parse_emotion_response(&body)?;
        debug!(emotion = %tag, "Classified sentence: {}", text);
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_call_body(arguments: &str) -> serde_json::Value {
        json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_emotion", "arguments": arguments}
                    }]
                }
            }]
        })
    }

    #[test]
    fn test_parse_tool_call() {
        let body = tool_call_body(r#"{"emotion": "sad"}"#).to_string();
        assert_eq!(parse_emotion_response(&body).unwrap(), EmotionTag::Sad);
    }

    #[test]
    fn test_parse_rejects_unknown_label_and_plain_text() {
        let unknown = tool_call_body(r#"{"emotion": "ecstatic"}"#).to_string();
        assert!(matches!(parse_emotion_response(&unknown), Err(ServiceError::Decode(_))));

        let plain = json!({"choices": [{"message": {"content": "happy"}}]}).to_string();
        assert!(matches!(parse_emotion_response(&plain), Err(ServiceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_classify_forces_tool_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "qwen", "tool_choice": "required"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body(r#"{"emotion":"happy"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = LlmEmotionClassifier::new(
            reqwest::Client::new(),
            OpenAiConfig::new(server.uri(), "k", "qwen"),
        );
        assert_eq!(classifier.classify("太好了！").await.unwrap(), EmotionTag::Happy);
    }
}
