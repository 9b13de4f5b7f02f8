use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub repetition_penalty: Option<f32>,
    pub json_mode: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            repetition_penalty: None,
            json_mode: false,
        }
    }
}

/// Chat-completion backend shared by every stage.
///
/// Implementations are constructed once per run and only read afterwards, so
/// a shared reference can be handed to each stage.
pub trait ChatModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat endpoint such as a local llama.cpp server.
pub struct OpenAiChatClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    health_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to create HTTP client for chat completions")?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.base_url),
            health_url: health_endpoint(&config.base_url),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn health_check(&self) -> Result<(), PipelineError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(Duration::from_secs(5))
            .send()
            .map_err(|err| {
                PipelineError::fatal_init(format!(
                    "LLM server unreachable at {}: {err}",
                    self.health_url
                ))
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::fatal_init(format!(
                "LLM server health check returned HTTP {} at {}",
                response.status(),
                self.health_url
            )));
        }

        info!(url = %self.health_url, model = %self.model, "LLM server healthy");
        Ok(())
    }
}

impl ChatModel for OpenAiChatClient {
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            repeat_penalty: params.repetition_penalty,
            response_format: params.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut backoff = self.initial_backoff;
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    attempt,
                    max_retries = self.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying chat completion"
                );
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }

            let request = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body);

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .context("failed to read chat completion body")?;
                        return parse_completion_body(&text);
                    }
                    if status.is_client_error() {
                        let detail = response.text().unwrap_or_default();
                        bail!("chat completion rejected with HTTP {status}: {detail}");
                    }
                    last_err = format!("HTTP {status}");
                }
                Err(err) => {
                    last_err = err.to_string();
                }
            }
        }

        Err(anyhow!(PipelineError::transient(
            "llm",
            format!(
                "chat completion failed after {} attempts: {last_err}",
                self.max_retries + 1
            )
        )))
    }
}

pub(crate) fn parse_completion_body(text: &str) -> Result<String> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(text).context("failed to decode chat completion JSON")?;

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default())
}

pub(crate) fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

pub(crate) fn health_endpoint(base_url: &str) -> String {
    format!("{}/health", server_root(base_url))
}

pub(crate) fn server_root(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base.strip_suffix("/chat/completions").unwrap_or(base);
    let base = base.strip_suffix("/v1").unwrap_or(base);
    base.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_endpoint_accepts_common_base_url_shapes() {
        assert_eq!(
            chat_endpoint("http://localhost:8081/v1"),
            "http://localhost:8081/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:8081/"),
            "http://localhost:8081/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:8081/v1/chat/completions"),
            "http://localhost:8081/v1/chat/completions"
        );
    }

    #[test]
    fn health_endpoint_strips_api_suffixes() {
        assert_eq!(
            health_endpoint("http://localhost:8081/v1"),
            "http://localhost:8081/health"
        );
        assert_eq!(
            health_endpoint("http://localhost:8081/v1/chat/completions/"),
            "http://localhost:8081/health"
        );
    }

    #[test]
    fn completion_body_reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"정답\": \"3\"}"}}]}"#;
        assert_eq!(
            parse_completion_body(body).expect("valid body"),
            "{\"정답\": \"3\"}"
        );
    }

    #[test]
    fn completion_body_with_null_content_is_empty() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_completion_body(body).expect("valid body"), "");
        assert_eq!(parse_completion_body(r#"{"choices":[]}"#).expect("valid body"), "");
    }

    #[test]
    fn completion_body_rejects_non_json() {
        assert!(parse_completion_body("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn request_serializes_optional_fields_only_when_set() {
        let messages = vec![ChatMessage::user("hi")];
        let plain = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 8,
            repeat_penalty: None,
            response_format: None,
        };
        let value = serde_json::to_value(&plain).expect("serialize");
        assert!(value.get("repeat_penalty").is_none());
        assert!(value.get("response_format").is_none());

        let json_mode = ChatCompletionRequest {
            repeat_penalty: Some(1.1),
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
            ..plain
        };
        let value = serde_json::to_value(&json_mode).expect("serialize");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value["repeat_penalty"].as_f64().is_some());
    }
}
