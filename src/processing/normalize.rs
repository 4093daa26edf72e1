//! Cleanup of raw model text into JSON.

use serde_json::Value;
use thiserror::Error;

/// Model text that is not valid JSON after fence stripping.
#[derive(Debug, Error)]
#[error("response is not valid JSON: {source}")]
pub struct NormalizeError {
    #[source]
    source: serde_json::Error,
}

/// Strip a surrounding Markdown code fence and parse the rest as JSON.
pub fn normalize(raw: &str) -> Result<Value, NormalizeError> {
    serde_json::from_str(strip_fence(raw)).map_err(|source| NormalizeError { source })
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` marker and a trailing ```` ``` ````.
pub fn strip_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_and_plain_responses_parse_identically() {
        let plain = r#"{"entities": {"E1": {"label": "Betty", "typ": "Person"}}}"#;
        let fenced = format!("```json\n{plain}\n```");
        let bare_fence = format!("  ```\n{plain}\n```  ");

        let expected = normalize(plain).unwrap();
        assert_eq!(normalize(&fenced).unwrap(), expected);
        assert_eq!(normalize(&bare_fence).unwrap(), expected);
        assert_eq!(expected["entities"]["E1"]["typ"], json!("Person"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(normalize("Hier ist das Ergebnis: {").is_err());
        assert!(normalize("```json\n```").is_err());
    }
}
