//! A single inference call against a single host.
//!
//! Deliberately thin: no retry, no circuit consultation. Those belong to
//! [`crate::retry`] and [`crate::host`] respectively; mixing them in here
//! would make this the one component nobody can test without the rest of
//! the stack running.

pub mod cloud;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::host::Host;

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

/// One inference call. Implemented for the real HTTP client below and for
/// scripted fakes in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn infer(
        &self,
        host: &Host,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError>;
}

pub struct HttpLlmClient {
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn infer(
        &self,
        host: &Host,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        infer_via_http(&self.client, &host.endpoint, &host.model, host.api_key.as_deref(), host.timeout, request)
            .await
            .map_err(|e| attribute_to_host(e, &host.name))
    }
}

async fn infer_via_http(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    api_key: Option<&str>,
    timeout: Duration,
    request: InferenceRequest,
) -> Result<InferenceResponse, InferenceError> {
    let mut messages = Vec::new();
    if let Some(system) = request.system_prompt.as_deref() {
        messages.push(ChatMessage { role: "system", content: system });
    }
    messages.push(ChatMessage { role: "user", content: &request.prompt });

    let body = ChatRequest {
        model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: false,
    };

    let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));

    let mut req = client.post(&url).header("Content-Type", "application/json").timeout(timeout).json(&body);
    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }

    let response = req
        .send()
        .await
        .map_err(|source| {
            if source.is_timeout() {
                InferenceError::Timeout { host: String::new(), timeout_secs: timeout.as_secs() }
            } else {
                InferenceError::Transport { host: String::new(), source }
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(InferenceError::Http { host: String::new(), status: status.as_u16() });
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|source| InferenceError::Decode { host: String::new(), source: to_serde_error(source) })?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| InferenceError::Validation {
            host: String::new(),
            reason: "response contained no choices".to_string(),
        })?;

    let (tokens_in, tokens_out) = parsed
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(InferenceResponse { text, tokens_in, tokens_out })
}

/// The request-building path above doesn't know the host name yet when it
/// constructs errors, so this backfills it after the fact rather than
/// threading `&str` through every branch.
fn attribute_to_host(error: InferenceError, host: &str) -> InferenceError {
    match error {
        InferenceError::Timeout { timeout_secs, .. } => {
            InferenceError::Timeout { host: host.to_string(), timeout_secs }
        }
        InferenceError::Transport { source, .. } => {
            InferenceError::Transport { host: host.to_string(), source }
        }
        InferenceError::Http { status, .. } => InferenceError::Http { host: host.to_string(), status },
        InferenceError::Decode { source, .. } => {
            InferenceError::Decode { host: host.to_string(), source }
        }
        InferenceError::Validation { reason, .. } => {
            InferenceError::Validation { host: host.to_string(), reason }
        }
    }
}

fn to_serde_error(source: reqwest::Error) -> serde_json::Error {
    serde::de::Error::custom(source.to_string())
}
