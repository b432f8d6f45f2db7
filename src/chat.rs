//! Chat orchestration: retrieve → prompt → generate.
//!
//! The returned [`ChatResponse`] carries exactly the contexts that were
//! placed in the prompt, so callers can cite them. Each generation call is
//! bounded by `generation.timeout_secs`; a [`RagError::ServiceUnavailable`]
//! failure is retried while attempts remain, nothing else is. Dropping the
//! future returned by [`ChatOrchestrator::chat`] cancels the request; chat
//! writes nothing, so there is nothing to roll back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ragbase_core::generation::{build_prompt, Generator, Prompt, PromptOptions};
use ragbase_core::models::{ChatMessage, ChatResponse};
use ragbase_core::{RagError, Result};

use crate::retrieval::RetrievalEngine;

pub struct ChatOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<dyn Generator>,
    options: PromptOptions,
    default_top_k: usize,
    timeout: Duration,
    max_attempts: u32,
}

impl ChatOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<dyn Generator>,
        options: PromptOptions,
        default_top_k: usize,
    ) -> Self {
        Self {
            retrieval,
            generator,
            options,
            default_top_k,
            timeout: Duration::from_secs(300),
            max_attempts: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.clamp(1, 2);
        self
    }

    pub async fn chat(
        &self,
        kb: &str,
        query: &str,
        history: &[ChatMessage],
        top_k: Option<usize>,
    ) -> Result<ChatResponse> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let contexts = self.retrieval.retrieve(kb, query, Some(top_k)).await?;
        let prompt = build_prompt(query, &contexts, history, &self.options);

        let response = self.generate(&prompt).await?;
        info!(
            kb,
            contexts = contexts.len(),
            history = history.len(),
            model = self.generator.model_name(),
            "generated chat response"
        );

        Ok(ChatResponse { response, contexts })
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(RagError::Timeout {
                    operation: "generation".to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Err(e @ RagError::ServiceUnavailable { .. }) if attempt < self.max_attempts => {
                    warn!(
                        model = self.generator.model_name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "generation failed, retrying"
                    );
                }
                other => return other,
            }
        }
    }
}
