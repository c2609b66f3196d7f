use serde_json::Value;

use super::FunctionTransform;
use crate::{event::LogRecord, internal_events::StructuredParseFailed};

/// Parses the message as a JSON object into `structured`.
///
/// Returns false and marks the record `unparsed` when the message is not an object. A record
/// parsed before is left alone.
pub fn parse_structured(record: &mut LogRecord) -> bool {
    if record.structured.is_some() {
        return true;
    }
    let body = record.message.trim();
    if body.starts_with('{') {
        if let Ok(Value::Object(object)) = serde_json::from_str(body) {
            record.structured = Some(object);
            record.unparsed = false;
            return true;
        }
    }
    record.unparsed = true;
    emit!(StructuredParseFailed {
        source_id: &record.source_id,
    });
    false
}

/// The `parse` filter. Records that do not parse pass on unchanged apart from `unparsed`.
pub struct ParseJson;

impl FunctionTransform for ParseJson {
    fn transform(&mut self, output: &mut Vec<LogRecord>, mut record: LogRecord) {
        parse_structured(&mut record);
        output.push(record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::event::{LogSource, LogType};

    fn record(message: &str) -> LogRecord {
        LogRecord::new(message, LogType::Application, LogSource::Container, Arc::from("s"))
    }

    #[test]
    fn parses_objects() {
        let mut record = record(r#" {"level":"warn","user":{"id":7}} "#);
        assert!(parse_structured(&mut record));
        assert_eq!(
            Value::Object(record.structured.unwrap()),
            json!({"level": "warn", "user": {"id": 7}})
        );
        assert!(!record.unparsed);
    }

    #[rstest]
    #[case("plain text")]
    #[case("[1, 2]")]
    #[case("{broken")]
    #[case("42")]
    fn non_objects_stay_unparsed(#[case] message: &str) {
        let mut record = record(message);
        assert!(!parse_structured(&mut record));
        assert!(record.unparsed);
        assert!(record.structured.is_none());
        assert_eq!(record.message, message);
    }
}
