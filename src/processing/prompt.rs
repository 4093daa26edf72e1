//! System instruction template and per-record user prompt.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::{Granularity, SchemaVariant};
use crate::model::ExtractionRequest;

/// Errors raised while loading the prompt template.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Template file could not be read.
    #[error("Prompt file {path} could not be read: {source}")]
    Unreadable {
        /// Configured template path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Template file holds only whitespace.
    #[error("Prompt file {0} is empty")]
    Empty(PathBuf),
}

/// System instruction plus the settings that shape every user prompt.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    instruction: String,
    variant: SchemaVariant,
    entity_types: BTreeSet<String>,
}

impl PromptTemplate {
    /// Read the instruction from `path`; missing or empty files are fatal.
    pub fn load(
        path: &Path,
        variant: SchemaVariant,
        entity_types: &[String],
    ) -> Result<Self, PromptError> {
        let instruction = fs::read_to_string(path).map_err(|source| PromptError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Self::new(instruction, variant, entity_types);
        if template.instruction.is_empty() {
            return Err(PromptError::Empty(path.to_path_buf()));
        }
        tracing::info!(
            path = %path.display(),
            chars = template.instruction.len(),
            "Loaded prompt template"
        );
        Ok(template)
    }

    /// Build a template from an in-memory instruction.
    pub fn new(
        instruction: impl Into<String>,
        variant: SchemaVariant,
        entity_types: &[String],
    ) -> Self {
        Self {
            instruction: instruction.into().trim().to_string(),
            variant,
            entity_types: entity_types.iter().cloned().collect(),
        }
    }

    /// Assemble the provider-agnostic request for one optimized text.
    pub fn request(&self, text: &str, granularity: Granularity) -> ExtractionRequest {
        let mut prompt = format!("Text:\n{text}\n\nAbstraktionslevel: {}/5", granularity.level());
        if !self.entity_types.is_empty() {
            let types = self.entity_types.iter().cloned().collect::<Vec<_>>().join(", ");
            prompt.push_str(&format!("\nErlaubte Entitätstypen: {types}"));
        }
        if self.variant.counts_triples() {
            prompt.push_str(&format!(
                "\nErwartete Anzahl Triples: {}",
                granularity.expected_triples()
            ));
        }

        ExtractionRequest {
            prompt,
            system_instruction: Some(self.instruction.clone()),
            granularity,
            entity_types: self.entity_types.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn triple_prompt_carries_level_types_and_range() {
        let template = PromptTemplate::new(
            "  Extrahiere.  ",
            SchemaVariant::Triples,
            &["Person".into(), "Ort".into()],
        );
        let request = template.request("Liebe Freundin", Granularity::new(1).unwrap());

        assert_eq!(
            request.prompt,
            "Text:\nLiebe Freundin\n\nAbstraktionslevel: 1/5\nErlaubte Entitätstypen: Ort, Person\nErwartete Anzahl Triples: 1-2"
        );
        assert_eq!(request.system_instruction.as_deref(), Some("Extrahiere."));
    }

    #[test]
    fn concept_prompt_has_no_triple_range() {
        let template = PromptTemplate::new("Vergleiche.", SchemaVariant::Concepts, &[]);
        let request = template.request("Text", Granularity::new(5).unwrap());
        assert_eq!(request.prompt, "Text:\nText\n\nAbstraktionslevel: 5/5");
    }

    #[test]
    fn missing_or_empty_template_is_an_error() {
        let dir = tempdir().unwrap();
        let missing =
            PromptTemplate::load(&dir.path().join("none.txt"), SchemaVariant::Triples, &[]);
        assert!(matches!(missing, Err(PromptError::Unreadable { .. })));

        let empty = dir.path().join("prompt.txt");
        fs::write(&empty, " \n\t").unwrap();
        let result = PromptTemplate::load(&empty, SchemaVariant::Triples, &[]);
        assert!(matches!(result, Err(PromptError::Empty(_))));
    }
}
