use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Ask the backend for a JSON object reply when it supports it.
    #[serde(default)]
    pub json_mode: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    1024
}

impl LlmRequest {
    pub fn simple(model: String, system: Option<String>, user: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            json_mode: false,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_message_constructors() {
        let msg = LlmMessage::user("hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
        assert_eq!(LlmMessage::assistant("reply").role, "assistant");
    }

    #[test]
    fn llm_request_simple_defaults() {
        let req = LlmRequest::simple("llama3".into(), None, "hi".into());
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, 1024);
        assert!(!req.json_mode);
    }

    #[test]
    fn llm_request_deserializes_with_defaults() {
        let req: LlmRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "system": null,
            "messages": [{"role": "user", "content": "x"}]
        }))
        .unwrap();
        assert_eq!(req.max_tokens, 1024);
        assert!(req.temperature.is_none());
    }
}
