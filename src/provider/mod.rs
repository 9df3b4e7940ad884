//! OpenAI-compatible provider client for chat and reasoning completions.
//!
//! One [`ProviderClient`] is constructed in the composition root and shared by
//! reference with every component that talks to the model provider. Prompts
//! are scrubbed (§[`crate::scrub`]) before leaving the process unless a caller
//! opts out, and the system prompt, when present, leads the message list so
//! provider-side prefix caching can kick in.

pub mod embeddings;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Settings;
use crate::scrub::PiiScrubber;
use crate::types::RagError;

/// Per-call knobs for [`ProviderClient::complete`].
#[derive(Clone, Debug, Default)]
pub struct CompletionOptions {
    /// Sent as the leading message when present.
    pub system_prompt: Option<String>,
    /// Overrides the configured chat model.
    pub model: Option<String>,
    /// Skips PII scrubbing of the user prompt.
    pub skip_scrub: bool,
}

impl CompletionOptions {
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }
}

/// Shared chat/reasoning client.
pub struct ProviderClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    chat_model: String,
    reasoner_model: String,
    scrubber: Arc<PiiScrubber>,
}

impl ProviderClient {
    pub fn new(settings: &Settings, scrubber: Arc<PiiScrubber>) -> Result<Self, RagError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| RagError::Configuration(format!("http client: {err}")))?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                settings.provider_base_url.trim_end_matches('/')
            ),
            api_key: settings.provider_api_key.clone(),
            chat_model: settings.chat_model.clone(),
            reasoner_model: settings.reasoner_model.clone(),
            scrubber,
        })
    }

    /// Requests a completion for `prompt`.
    ///
    /// A successful response whose content is null yields an empty string,
    /// logged as a warning; transport and provider failures surface as
    /// [`RagError::Completion`]. Retries are the caller's responsibility.
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, RagError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RagError::Configuration("PROVIDER_API_KEY is not set".to_string())
        })?;
        let model = options.model.as_deref().unwrap_or(&self.chat_model);

        let safe_prompt = if options.skip_scrub {
            std::borrow::Cow::Borrowed(prompt)
        } else {
            self.scrubber.scrub(prompt)
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: safe_prompt.as_ref(),
        });

        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| RagError::Completion(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Completion(format!(
                "provider returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| RagError::Completion(format!("malformed response: {err}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        match content {
            Some(text) => Ok(text),
            None => {
                warn!(model, "completion response had no content, returning empty string");
                Ok(String::new())
            }
        }
    }

    /// Routes a prompt to the reasoning model, used for entity resolution and
    /// other disambiguation-heavy tasks.
    pub async fn reason(&self, prompt: &str) -> Result<String, RagError> {
        self.complete(
            prompt,
            &CompletionOptions {
                model: Some(self.reasoner_model.clone()),
                ..CompletionOptions::default()
            },
        )
        .await
    }

    /// Model used when no override is supplied.
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
