//! Completion provider seam and the genai-backed implementation

use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest};
use genai::Client;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{CoreError, Result};
use crate::message::{Message, MessageRole};

/// Produces one assistant reply from a rendered system prompt and the
/// recent turn history.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, history: &[Message], user_text: &str)
        -> Result<String>;
}

/// [`CompletionProvider`] backed by the genai multi-provider client.
pub struct GenAiProvider {
    client: Client,
    config: ModelConfig,
}

impl GenAiProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: Client::default(),
            config,
        }
    }
}

#[async_trait]
impl CompletionProvider for GenAiProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_text: &str,
    ) -> Result<String> {
        let mut request = ChatRequest::from_system(system_prompt);
        for message in history {
            request = match message.role {
                MessageRole::User => {
                    request.append_message(ChatMessage::user(message.text.clone()))
                }
                MessageRole::Assistant => {
                    request.append_message(ChatMessage::assistant(message.text.clone()))
                }
            };
        }
        request = request.append_message(ChatMessage::user(user_text.to_string()));

        let options = ChatOptions::default()
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = self
            .client
            .exec_chat(&self.config.model, request, Some(&options))
            .await
            .map_err(|e| CoreError::LlmUnavailable {
                cause: e.to_string(),
            })?;

        let text = response
            .content_text_as_str()
            .ok_or_else(|| CoreError::LlmUnavailable {
                cause: "model returned no text content".to_string(),
            })?;

        debug!(model = %self.config.model, chars = text.len(), "completion received");
        Ok(text.to_string())
    }
}
