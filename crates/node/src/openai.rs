//! Chat-completions client for OpenAI-compatible inference backends.
//!
//! Sends each question as a single user message under a fixed system
//! prompt to `POST {base_url}/chat/completions` using [`reqwest`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskmesh_core::inference::{InferenceClient, InferenceError};

use crate::config::OpenAiConfig;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Provide concise and accurate answers to questions.";
const MAX_TOKENS: u32 = 150;
const TEMPERATURE: f32 = 0.7;

/// Answer used when the backend returns no content.
pub const NO_ANSWER: &str = "No answer generated";

pub struct OpenAiInference {
    client: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiInference {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    fn request<'a>(&'a self, question: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }

    /// Map a non-2xx response to [`InferenceError::Backend`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(InferenceError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Content of the first choice, or [`NO_ANSWER`] when there is none.
fn extract_answer(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty())
        .unwrap_or_else(|| NO_ANSWER.to_string())
}

fn transport(err: reqwest::Error) -> InferenceError {
    InferenceError::Transport(err.to_string())
}

#[async_trait]
impl InferenceClient for OpenAiInference {
    async fn answer(&self, question: &str) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&self.request(question))
            .send()
            .await
            .map_err(transport)?;

        let response = Self::ensure_success(response).await?;
        let body: ChatResponse = response.json().await.map_err(transport)?;
        Ok(extract_answer(body))
    }
}
