//! Processing metadata merged into model output.

use serde_json::{Map, Value, json};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::types::{Granularity, SchemaVariant};
use crate::source::SourceRecord;

const ORIGINAL_LANGUAGE: &str = "original";

/// Facts about one extraction run recorded next to the model output.
#[derive(Debug, Clone, Copy)]
pub struct RunFacts<'a> {
    /// Record the output was produced from.
    pub record: &'a SourceRecord,
    /// Requested granularity.
    pub granularity: Granularity,
    /// Time processing started.
    pub started: OffsetDateTime,
    /// Wall-clock processing time.
    pub elapsed: Duration,
}

/// Append the variant's metadata blocks to the model object.
///
/// Model keys keep their order; a metadata block replaces a same-named model key in place.
pub fn attach(
    variant: SchemaVariant,
    mut object: Map<String, Value>,
    facts: &RunFacts<'_>,
) -> Value {
    let seconds = round_seconds(facts.elapsed);
    let started = facts.started.format(&Rfc3339).unwrap_or_default();
    let record = facts.record;

    match variant {
        SchemaVariant::Triples => {
            let triple_count = object
                .get("triples")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            object.insert(
                "parameter".into(),
                json!({
                    "granularitaet": facts.granularity.level(),
                    "anzahl_triples": triple_count,
                }),
            );
            object.insert(
                "quelle".into(),
                json!({
                    "datei": record.origin,
                    "verarbeitet": started,
                    "zeichenanzahl": record.text.chars().count(),
                    "ausfuehrungszeit_sekunden": seconds,
                    "original_text": record.text,
                }),
            );
        }
        SchemaVariant::Concepts => {
            let texts = original_texts(record);
            let languages: Vec<Value> = texts.keys().cloned().map(Value::String).collect();
            object.insert(
                "meta".into(),
                json!({
                    "source_id": record.id,
                    "languages": languages,
                    "original_texts": texts,
                    "execution_date": started,
                    "execution_time_seconds": seconds,
                }),
            );
        }
    }
    Value::Object(object)
}

/// Overwrite only the original-text field of an existing document.
///
/// Returns `false` when the document root is not an object.
pub fn refresh_original_text(
    variant: SchemaVariant,
    document: &mut Value,
    record: &SourceRecord,
) -> bool {
    let Some(root) = document.as_object_mut() else {
        return false;
    };
    let (block, field, value) = match variant {
        SchemaVariant::Triples => {
            ("quelle", "original_text", Value::String(record.text.clone()))
        }
        SchemaVariant::Concepts => {
            ("meta", "original_texts", Value::Object(original_texts(record)))
        }
    };

    let entry = root
        .entry(block)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(block) = entry.as_object_mut() {
        block.insert(field.into(), value);
    }
    true
}

fn original_texts(record: &SourceRecord) -> Map<String, Value> {
    if record.original_texts.is_empty() {
        let mut texts = Map::new();
        texts.insert(ORIGINAL_LANGUAGE.into(), Value::String(record.text.clone()));
        return texts;
    }
    record
        .original_texts
        .iter()
        .map(|(language, text)| (language.clone(), Value::String(text.clone())))
        .collect()
}

fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn facts(record: &SourceRecord) -> RunFacts<'_> {
        RunFacts {
            record,
            granularity: Granularity::new(2).unwrap(),
            started: datetime!(2024-05-01 10:15:30 UTC),
            elapsed: Duration::from_millis(1234),
        }
    }

    #[test]
    fn triple_metadata_follows_model_keys() {
        let mut record = SourceRecord::new("brief", "Liebe Freundin");
        record.origin = "1850/brief.txt".into();
        let model = json!({
            "entities": {},
            "quelle": "vom Modell",
            "triples": [{}, {}]
        });

        let document = attach(
            SchemaVariant::Triples,
            model.as_object().cloned().unwrap(),
            &facts(&record),
        );

        let keys: Vec<&str> = document.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["entities", "quelle", "triples", "parameter"]);
        assert_eq!(document["parameter"]["anzahl_triples"], 2);
        assert_eq!(document["parameter"]["granularitaet"], 2);
        assert_eq!(document["quelle"]["datei"], "1850/brief.txt");
        assert_eq!(document["quelle"]["verarbeitet"], "2024-05-01T10:15:30Z");
        assert_eq!(document["quelle"]["zeichenanzahl"], 14);
        assert_eq!(document["quelle"]["ausfuehrungszeit_sekunden"], 1.23);
        assert_eq!(document["quelle"]["original_text"], "Liebe Freundin");
    }

    #[test]
    fn concept_metadata_lists_languages() {
        let mut record = SourceRecord::new("7", "Beschreibung");
        record.original_texts = vec![
            ("de".into(), "Beschreibung".into()),
            ("en".into(), "Description".into()),
        ];
        let document = attach(SchemaVariant::Concepts, Map::new(), &facts(&record));

        assert_eq!(document["meta"]["source_id"], "7");
        assert_eq!(document["meta"]["languages"], json!(["de", "en"]));
        assert_eq!(document["meta"]["original_texts"]["en"], "Description");
    }

    #[test]
    fn concept_metadata_falls_back_to_single_text() {
        let record = SourceRecord::new("8", "Nur ein Text");
        let document = attach(SchemaVariant::Concepts, Map::new(), &facts(&record));
        assert_eq!(document["meta"]["original_texts"], json!({ "original": "Nur ein Text" }));
    }

    #[test]
    fn refresh_touches_only_the_original_text() {
        let record = SourceRecord::new("brief", "Neuer Text");
        let mut document = json!({
            "triples": [],
            "quelle": { "datei": "brief.txt", "original_text": "alt", "zeichenanzahl": 3 }
        });

        assert!(refresh_original_text(SchemaVariant::Triples, &mut document, &record));
        assert_eq!(
            document,
            json!({
                "triples": [],
                "quelle": {
                    "datei": "brief.txt",
                    "original_text": "Neuer Text",
                    "zeichenanzahl": 3
                }
            })
        );
        assert!(!refresh_original_text(SchemaVariant::Triples, &mut json!([]), &record));
    }
}
