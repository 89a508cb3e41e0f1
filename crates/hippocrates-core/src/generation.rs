use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hippocrates_provider::{parse_provider_model, LlmMessage, LlmProvider, LlmRequest, ProviderRegistry};
use serde_json::Value;
use tokio::time;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::prompt::{GeneratedOutput, OutputSchema, Prompt};

/// Natural-language generation behind the engine. Implementations return a
/// JSON value already checked against `schema`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value, GenerationError>;
}

/// Generation over any chat-completions provider.
pub struct LlmGenerationService {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl LlmGenerationService {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
            max_tokens: 768,
            temperature: None,
        }
    }

    pub fn from_config(config: &GenerationConfig, registry: &ProviderRegistry) -> Result<Self> {
        let (provider_id, model) = parse_provider_model(&config.model)?;
        let provider = registry.get(&provider_id)?;
        Ok(Self {
            provider,
            model,
            timeout: Duration::from_secs(config.timeout_secs),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn classify_provider_error(err: &anyhow::Error, timeout_secs: u64) -> GenerationError {
    let text = format!("{err:#}");
    let lower = text.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        GenerationError::Timeout(timeout_secs)
    } else {
        GenerationError::Unavailable(text)
    }
}

/// The JSON object in a reply, tolerating code fences and surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[async_trait]
impl GenerationService for LlmGenerationService {
    async fn generate(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value, GenerationError> {
        let request = LlmRequest {
            model: self.model.clone(),
            system: Some(prompt.system.clone()),
            messages: vec![LlmMessage::user(prompt.render_user())],
            max_tokens: self.max_tokens,
            json_mode: true,
            temperature: self.temperature,
        };

        let timeout_secs = self.timeout.as_secs();
        let response = match time::timeout(self.timeout, self.provider.chat(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_provider_error(&e, timeout_secs)),
            Err(_) => {
                tracing::warn!(model = %self.model, timeout_secs, "generation abandoned after timeout");
                return Err(GenerationError::Timeout(timeout_secs));
            }
        };

        tracing::debug!(
            model = %self.model,
            input_tokens = ?response.input_tokens,
            output_tokens = ?response.output_tokens,
            "generation complete"
        );

        let value = extract_json(&response.text)
            .ok_or_else(|| GenerationError::Malformed("reply did not contain a JSON object".into()))?;
        schema.validate(&value)?;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Generated { output: GeneratedOutput, attempts: u32 },
    /// Both attempts produced unusable output; the caller falls back to the
    /// engine's own wording.
    Degraded { reason: String, attempts: u32 },
}

async fn attempt(
    service: &dyn GenerationService,
    prompt: &Prompt,
    schema: &OutputSchema,
) -> Result<GeneratedOutput, GenerationError> {
    let value = service.generate(prompt, schema).await?;
    schema.validate(&value)
}

/// At most two attempts. A malformed reply is retried with a correction and
/// degrades if the retry also fails; a timeout or outage is retried with a
/// shortened prompt and surfaces as an error if the retry fails the same way.
pub async fn generate_with_policy(
    service: &dyn GenerationService,
    prompt: &Prompt,
    schema: &OutputSchema,
) -> Result<GenerationOutcome, GenerationError> {
    let first = match attempt(service, prompt, schema).await {
        Ok(output) => return Ok(GenerationOutcome::Generated { output, attempts: 1 }),
        Err(e) => e,
    };

    let retry = match &first {
        GenerationError::Malformed(reason) => {
            tracing::warn!(event = "MalformedGeneration", reason = %reason, "retrying with a correction");
            prompt.with_correction(reason)
        }
        GenerationError::Timeout(_) | GenerationError::Unavailable(_) => {
            tracing::warn!(error = %first, "retrying generation with shortened context");
            prompt.shortened()
        }
    };

    match attempt(service, &retry, schema).await {
        Ok(output) => Ok(GenerationOutcome::Generated { output, attempts: 2 }),
        Err(second) if first.wants_shorter_context() && second.wants_shorter_context() => {
            tracing::warn!(error = %second, "generation failed twice");
            Err(second)
        }
        Err(second) => {
            tracing::warn!(
                event = "MalformedGeneration",
                first = %first,
                second = %second,
                "degrading to engine output"
            );
            Ok(GenerationOutcome::Degraded {
                reason: second.to_string(),
                attempts: 2,
            })
        }
    }
}
