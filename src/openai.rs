//! Text-generation backend.
//!
//! `ChallengeBackend` is the seam the orchestrator calls through: a model name,
//! a prompt and a response-shape hint go in, raw text comes out. The text is
//! whatever the model produced; nothing here assumes it is valid JSON.
//!
//! `OpenAI` implements it over chat.completions with `json_object` output.
//! We log model names, latencies and response sizes, never contents or the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::GenerationError;
use crate::util::trunc_for_log;

/// What kind of JSON object the caller expects back. A hint only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
  Challenge,
  Answer,
}

impl ResponseShape {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseShape::Challenge => "challenge",
      ResponseShape::Answer => "answer",
    }
  }

  fn temperature(&self) -> f32 {
    match self {
      ResponseShape::Challenge => 0.8,
      ResponseShape::Answer => 0.2,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
  pub system: String,
  pub user: String,
}

#[async_trait]
pub trait ChallengeBackend: Send + Sync {
  fn name(&self) -> &str;

  async fn generate(&self, model: &str, prompt: &Prompt, shape: ResponseShape) -> Result<String, GenerationError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(request_timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let client = match reqwest::Client::builder().timeout(request_timeout).build() {
      Ok(c) => c,
      Err(e) => {
        warn!(target: "codeprac_backend", error = %e, "Failed to build HTTP client; generation disabled");
        return None;
      }
    };

    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() })
  }

  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json_text(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, GenerationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "codeprac-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(map_transport_error)?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      return Err(status_error(status, &body));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(map_transport_error)?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    if text.trim().is_empty() {
      return Err(GenerationError::Parsing("model returned an empty completion".into()));
    }
    Ok(text)
  }
}

#[async_trait]
impl ChallengeBackend for OpenAI {
  fn name(&self) -> &str {
    "openai"
  }

  #[instrument(level = "info", skip(self, prompt), fields(model = %model, shape = shape.as_str()))]
  async fn generate(&self, model: &str, prompt: &Prompt, shape: ResponseShape) -> Result<String, GenerationError> {
    let start = Instant::now();
    let result = self.chat_json_text(model, &prompt.system, &prompt.user, shape.temperature()).await;
    let elapsed = start.elapsed();
    match &result {
      Ok(text) => info!(?elapsed, response_len = text.len(), "Model response received"),
      Err(e) => debug!(?elapsed, error = %e, "Model call failed"),
    }
    result
  }
}

fn map_transport_error(e: reqwest::Error) -> GenerationError {
  if e.is_timeout() {
    GenerationError::Network(format!("request timed out: {e}"))
  } else if e.is_connect() || e.is_request() {
    GenerationError::Network(e.to_string())
  } else if e.is_decode() {
    GenerationError::Parsing(format!("invalid completion envelope: {e}"))
  } else {
    GenerationError::Other(e.to_string())
  }
}

/// Non-success HTTP status into the error taxonomy.
fn status_error(status: u16, body: &str) -> GenerationError {
  let message = extract_openai_error(body).unwrap_or_else(|| trunc_for_log(body, 200));
  match status {
    429 => GenerationError::RateLimited(message),
    _ => GenerationError::Upstream { status, message },
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  #[test]
  fn extracts_error_message() {
    let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("You exceeded your current quota"));
    assert_eq!(extract_openai_error("<html>bad gateway</html>"), None);
  }

  #[test]
  fn statuses_map_onto_taxonomy() {
    assert_eq!(status_error(429, "{}").kind(), ErrorKind::ApiLimit);
    assert_eq!(status_error(503, "unavailable").kind(), ErrorKind::Network);
    assert_eq!(status_error(408, "").kind(), ErrorKind::Network);
    let e = status_error(401, r#"{"error":{"message":"Incorrect API key provided"}}"#);
    assert_eq!(e, GenerationError::Upstream { status: 401, message: "Incorrect API key provided".into() });
  }

  #[test]
  fn request_body_asks_for_json_object() {
    let req = ChatCompletionRequest {
      model: "gpt-4o-mini".into(),
      messages: vec![ChatMessageReq { role: "user".into(), content: "hi".into() }],
      temperature: 0.2,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(v["response_format"]["type"], "json_object");
    assert!(v.get("max_tokens").is_none());
  }
}
