//! Text generation providers used to write answers.
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"openai"` | [`OpenAIGenerator`], chat completions API |
//! | `"ollama"` | [`OllamaGenerator`], `/api/chat` on a local instance |
//!
//! Both share the provider retry policy in [`crate::http`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{require_env, GenerationConfig};
use crate::error::PipelineError;
use crate::http::send_with_retry;

pub const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";
const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}

fn invalid_response(provider: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Provider {
        provider: provider.to_string(),
        status: None,
        message: format!("invalid chat response: {}", err),
    }
}

pub struct OpenAIGenerator {
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = require_env("OPENAI_API_KEY", "the openai generation provider")?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_CHAT_MODEL.to_string()),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": options.system_prompt},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = send_with_retry("openai", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| invalid_response("openai", e))?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::config("generation.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Deserialize)]
struct OllamaChat {
    message: ChatMessage,
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": options.system_prompt},
                {"role": "user", "content": prompt},
            ],
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        let url = format!("{}/api/chat", self.url);

        let response = send_with_retry("ollama", self.max_retries, || {
            self.client.post(&url).json(&body).send()
        })
        .await?;
        let chat: OllamaChat = response
            .json()
            .await
            .map_err(|e| invalid_response("ollama", e))?;
        Ok(chat.message.content.unwrap_or_default().trim().to_string())
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        "disabled" => Err(PipelineError::config(
            "Generation provider is disabled; set [generation] provider in the config",
        )
        .into()),
        other => Err(PipelineError::config(format!("Unknown generation provider: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn options() -> GenerateOptions {
        GenerateOptions {
            system_prompt: "be brief".into(),
            max_tokens: 50,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_openai_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  It parses. [aabbccddeeff-0001]\n"}}]
            })))
            .mount(&server)
            .await;
        let generator = OpenAIGenerator {
            model: DEFAULT_OPENAI_CHAT_MODEL.into(),
            base_url: server.uri(),
            api_key: "sk-test".into(),
            max_retries: 0,
            client: reqwest::Client::new(),
        };

        let answer = generator.generate("question?", &options()).await.unwrap();
        assert_eq!(answer, "It parses. [aabbccddeeff-0001]");

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][0]["content"], "be brief");
        assert_eq!(sent["messages"][1]["content"], "question?");
        assert_eq!(sent["max_tokens"], 50);
    }

    #[tokio::test]
    async fn test_ollama_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"message": {"role": "assistant", "content": "hello"}, "done": true}),
            ))
            .mount(&server)
            .await;
        let generator = OllamaGenerator {
            model: "llama3".into(),
            url: server.uri(),
            max_retries: 0,
            client: reqwest::Client::new(),
        };

        assert_eq!(generator.generate("hi", &options()).await.unwrap(), "hello");
        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["options"]["num_predict"], 50);
    }

    #[test]
    fn test_disabled_generator_is_config_error() {
        let err = create_generator(&GenerationConfig::default()).err().unwrap();
        assert!(PipelineError::is_config(&err));
    }
}
