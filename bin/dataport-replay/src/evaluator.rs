use bytes::{Bytes, BytesMut};
use dataport_core::evaluate::{encode_emitted, EmittedValue, EvaluationError, KeyEvaluator};
use dataport_event::EventMetadata;
use serde_json::Value;

/// Evaluates index keys by projecting top-level fields out of JSON documents.
///
/// The configured fields are emitted in order, with absent fields emitted as undefined. A document matches when it is
/// a JSON object carrying at least one of the fields.
#[derive(Clone, Debug)]
pub struct FieldProjection {
    fields: Vec<String>,
}

impl FieldProjection {
    /// Creates a new `FieldProjection` over the given fields.
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl KeyEvaluator for FieldProjection {
    fn evaluate(
        &self, _key: &[u8], body: &[u8], _metadata: &EventMetadata, encode_buffer: Option<&mut BytesMut>,
    ) -> Result<Option<Bytes>, EvaluationError> {
        let document: Value = serde_json::from_slice(body).map_err(|e| EvaluationError::Raised {
            reason: format!("document is not valid JSON: {}", e),
        })?;

        let Value::Object(mut document) = document else {
            return Ok(None);
        };

        if !self.fields.iter().any(|field| document.contains_key(field)) {
            return Ok(None);
        }

        let emitted = self
            .fields
            .iter()
            .map(|field| document.remove(field).map_or(EmittedValue::Undefined, EmittedValue::from))
            .collect::<Vec<_>>();

        encode_emitted(&emitted, encode_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(fields: &[&str]) -> FieldProjection {
        FieldProjection::new(fields.iter().map(|f| f.to_string()).collect())
    }

    fn evaluate(projection: &FieldProjection, body: &str) -> Result<Option<Bytes>, EvaluationError> {
        projection.evaluate(b"doc", body.as_bytes(), &EventMetadata::default(), None)
    }

    #[test]
    fn projects_fields_in_order() {
        let key = evaluate(
            &projection(&["customer", "total"]),
            r#"{"total":12.5,"customer":"ada","ignored":true}"#,
        )
        .unwrap();
        assert_eq!(key.as_deref(), Some(&br#"["ada",12.5]"#[..]));
    }

    #[test]
    fn absent_fields_are_undefined() {
        let key = evaluate(&projection(&["customer", "total"]), r#"{"customer":"ada"}"#).unwrap();
        assert_eq!(key.as_deref(), Some(&br#"["ada",null]"#[..]));
    }

    #[test]
    fn documents_without_fields_do_not_match() {
        assert_eq!(evaluate(&projection(&["customer"]), r#"{"other":1}"#).unwrap(), None);
        assert_eq!(evaluate(&projection(&["customer"]), "[1,2]").unwrap(), None);
    }

    #[test]
    fn invalid_json_is_an_evaluation_error() {
        let err = evaluate(&projection(&["customer"]), "{not json").unwrap_err();
        assert!(matches!(err, EvaluationError::Raised { .. }));
    }

    #[test]
    fn uses_encode_buffer_when_offered() {
        let mut buf = BytesMut::with_capacity(128);
        let key = projection(&["customer"])
            .evaluate(b"doc", br#"{"customer":"ada"}"#, &EventMetadata::default(), Some(&mut buf))
            .unwrap();
        assert_eq!(key.as_deref(), Some(&br#"["ada"]"#[..]));
    }
}
