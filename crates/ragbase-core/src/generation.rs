//! Prompt assembly and the language-model [`Generator`] trait.
//!
//! [`build_prompt`] lays out a chat turn in a fixed order: system framing,
//! retrieved contexts labeled by source filename, caller-supplied history
//! (oldest first), then the current question. Backends send
//! [`Prompt::messages`] as a chat message list.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{ChatMessage, ChatRole, RetrievalContext};

pub const DEFAULT_CTX_CHARS_PER_CHUNK: usize = 600;

const ANSWER_FRAMING: &str = "You are a helpful assistant that answers questions based on the \
provided context. Use only the information from the context. If the context does not contain \
enough information to answer the question, say so clearly.";

const NO_CONTEXT_FRAMING: &str = "You are a helpful assistant. No relevant content was found in \
the knowledge base for this question. Tell the user that the documents do not cover it and \
suggest uploading or indexing documents that do.";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<ChatRole> for PromptRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => PromptRole::User,
            ChatRole::Assistant => PromptRole::Assistant,
        }
    }
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// An assembled prompt, ready for a generation backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
    /// Number of retrieved contexts embedded in the system message.
    #[serde(skip)]
    pub context_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptOptions {
    /// Each context is cut to this many characters, with `...` appended.
    pub ctx_chars_per_chunk: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            ctx_chars_per_chunk: DEFAULT_CTX_CHARS_PER_CHUNK,
        }
    }
}

pub fn build_prompt(
    query: &str,
    contexts: &[RetrievalContext],
    history: &[ChatMessage],
    options: &PromptOptions,
) -> Prompt {
    let blocks: Vec<String> = contexts
        .iter()
        .filter(|c| !c.text.trim().is_empty())
        .enumerate()
        .map(|(i, c)| {
            format!(
                "[Context {} from {}]\n{}",
                i + 1,
                c.filename,
                trim_chars(c.text.trim(), options.ctx_chars_per_chunk)
            )
        })
        .collect();

    let system = if blocks.is_empty() {
        NO_CONTEXT_FRAMING.to_string()
    } else {
        format!(
            "{}\n\nContext from documents:\n{}",
            ANSWER_FRAMING,
            blocks.join("\n\n")
        )
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage {
        role: PromptRole::System,
        content: system,
    });
    messages.extend(history.iter().map(|m| PromptMessage {
        role: m.role.into(),
        content: m.content.clone(),
    }));
    messages.push(PromptMessage {
        role: PromptRole::User,
        content: format!("Question: {}", query.trim()),
    });

    Prompt {
        messages,
        context_count: blocks.len(),
    }
}

fn trim_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// A language-model backend: `generate(prompt) -> text`.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Canned-response generator for offline runs and tests.
pub struct StubGenerator;

#[async_trait]
impl Generator for StubGenerator {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        Ok(format!(
            "This is a simulated response grounded on {} context(s).",
            prompt.context_count
        ))
    }
}
