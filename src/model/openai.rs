use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::{ExtractionRequest, ProviderAdapter};

const DEFAULT_MAX_TOKENS: u32 = 8000;

/// OpenAI-compatible chat completions (OpenWebUI, Ollama, vLLM).
pub struct OpenAiAdapter {
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiAdapter {
    /// Create an adapter for `model`.
    pub fn new(model: impl Into<String>, temperature: f64, max_tokens: Option<u32>) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

/// Text of a chat, legacy completion or Ollama `response` envelope.
pub(super) fn completion_text(body: &Value) -> Option<&str> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/choices/0/text").and_then(Value::as_str))
        .or_else(|| body.get("response").and_then(Value::as_str))
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn build_payload(&self, request: &ExtractionRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_instruction {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }

    fn extract_output(&self, body: &Value) -> Option<String> {
        completion_text(body).map(str::to_string)
    }

    fn authorize(&self, builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
        match api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::Granularity;

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            prompt: "Text:\nHallo".into(),
            system_instruction: Some("Extrahiere Triples".into()),
            granularity: Granularity::new(2).unwrap(),
            entity_types: Default::default(),
        }
    }

    #[test]
    fn payload_carries_system_and_user_messages() {
        let adapter = OpenAiAdapter::new("llama3", 0.1, None);
        let payload = adapter.build_payload(&request());
        assert_eq!(payload["model"], "llama3");
        assert_eq!(payload["max_tokens"], 8000);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "Text:\nHallo");
    }

    #[test]
    fn extracts_text_from_known_envelopes() {
        let adapter = OpenAiAdapter::new("m", 0.1, None);
        let chat = json!({ "choices": [{ "message": { "content": "{}" } }] });
        let completion = json!({ "choices": [{ "text": "legacy" }] });
        let ollama = json!({ "response": "plain" });

        assert_eq!(adapter.extract_output(&chat).as_deref(), Some("{}"));
        assert_eq!(adapter.extract_output(&completion).as_deref(), Some("legacy"));
        assert_eq!(adapter.extract_output(&ollama).as_deref(), Some("plain"));
        assert_eq!(adapter.extract_output(&json!({ "error": "x" })), None);
    }
}
