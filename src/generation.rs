//! Language-model backends implementing [`Generator`].
//!
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` with `stream: false`.
//! - **[`OpenAIGenerator`]**: `POST {url}/v1/chat/completions`.
//! - **[`StubGenerator`]**: canned answer, no network (core crate).
//!
//! Backends make exactly one request per call. Timeouts and the bounded
//! retry policy for chat are applied by the orchestrator in [`crate::chat`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use ragbase_core::generation::{Generator, Prompt, StubGenerator};
use ragbase_core::{RagError, Result};

use crate::config::GenerationConfig;
use crate::upstream;

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "stub" => Ok(Arc::new(StubGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn messages_json(prompt: &Prompt) -> serde_json::Value {
    serde_json::Value::Array(
        prompt
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect(),
    )
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: upstream::client(timeout)?,
            model: config.model_or_default(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(prompt),
            "stream": false,
            "options": { "num_predict": self.max_tokens },
        });
        let json = upstream::post_json(
            &self.client,
            "ollama",
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            &body,
            None,
            self.timeout,
        )
        .await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| RagError::upstream("ollama", "response is missing message.content"))
    }
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: upstream::client(timeout)?,
            model: config.model_or_default(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(prompt),
            "max_tokens": self.max_tokens,
        });
        let json = upstream::post_json(
            &self.client,
            "openai",
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            &body,
            Some(&self.api_key),
            self.timeout,
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| {
                RagError::upstream("openai", "response is missing choices[0].message.content")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use ragbase_core::generation::{build_prompt, PromptOptions};
    use ragbase_core::models::RetrievalContext;
    use std::sync::Mutex;

    #[test]
    fn test_messages_json_uses_chat_roles() {
        let prompt = build_prompt("q", &[], &[], &PromptOptions::default());
        let json = messages_json(&prompt);
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"], "Question: q");
    }

    #[tokio::test]
    async fn test_ollama_generator_round_trip() {
        let seen: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let app = Router::new().route(
            "/api/chat",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(serde_json::json!({"message": {"role": "assistant", "content": " Blue. "}}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = GenerationConfig {
            url: Some(format!("http://{}", addr)),
            max_tokens: 64,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let contexts = vec![RetrievalContext {
            text: "The sky is blue.".to_string(),
            filename: "a.txt".to_string(),
            score: Some(0.9),
            sequence_index: 0,
        }];
        let prompt = build_prompt("What color is the sky?", &contexts, &[], &PromptOptions::default());

        assert_eq!(generator.generate(&prompt).await.unwrap(), "Blue.");
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }
}
