use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

use super::{ExtractionRequest, ProviderAdapter, openai::completion_text};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 65536;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

impl<'a> Content<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            parts: vec![Part { text }],
        }
    }
}

/// Gemini `generateContent` envelope; the key travels as a query parameter.
pub struct GeminiAdapter {
    temperature: f64,
    max_output_tokens: u32,
}

impl GeminiAdapter {
    /// Create an adapter. The model is part of the configured endpoint path.
    pub fn new(temperature: f64, max_output_tokens: Option<u32>) -> Self {
        Self {
            temperature,
            max_output_tokens: max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn build_payload(&self, request: &ExtractionRequest) -> Value {
        let body = GenerateContentRequest {
            contents: vec![Content::text(&request.prompt)],
            system_instruction: request.system_instruction.as_deref().map(Content::text),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    fn extract_output(&self, body: &Value) -> Option<String> {
        // Gateways in front of Gemini may answer with an OpenAI-style envelope.
        body.pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .or_else(|| completion_text(body))
            .map(str::to_string)
    }

    fn authorize(&self, builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
        match api_key {
            Some(key) => builder.query(&[("key", key)]),
            None => builder,
        }
    }
}
