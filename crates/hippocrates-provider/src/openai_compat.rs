//! OpenAI-compatible backends that only differ by base URL.

use crate::OpenAiProvider;

pub const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434/v1";

/// Ollama local API. Default: http://localhost:11434/v1
pub fn ollama() -> OpenAiProvider {
    ollama_with_base(OLLAMA_DEFAULT_BASE)
}

/// Ollama with custom base URL
pub fn ollama_with_base(base_url: impl Into<String>) -> OpenAiProvider {
    // Ollama ignores the key but the header must be present
    OpenAiProvider::new("ollama", base_url)
}

/// Custom OpenAI-compatible endpoint (llama.cpp server, LM Studio, vLLM, ...)
pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}
