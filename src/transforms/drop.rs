use serde_json::{Map, Value};

use super::FunctionTransform;
use crate::{
    config::{DropCondition, DropTest},
    event::{EventStatus, Finalizable, LogRecord},
    internal_events::FilterDropped,
};

/// The `drop` filter: a record is discarded when all conditions of any one test hold.
pub struct DropFilter {
    pipeline: String,
    name: String,
    tests: Vec<DropTest>,
}

impl DropFilter {
    pub fn new(pipeline: &str, name: &str, tests: &[DropTest]) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            name: name.to_string(),
            tests: tests.to_vec(),
        }
    }

    fn should_drop(&self, doc: &Map<String, Value>) -> bool {
        self.tests.iter().any(|test| {
            !test.test.is_empty() && test.test.iter().all(|condition| holds(condition, doc))
        })
    }
}

/// Missing fields compare as the empty string, other non-strings as their JSON text.
fn holds(condition: &DropCondition, doc: &Map<String, Value>) -> bool {
    let value = match condition.field.get(doc) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
    };
    match (&condition.matches, &condition.not_matches) {
        (Some(regex), _) => regex.is_match(&value),
        (None, Some(regex)) => !regex.is_match(&value),
        (None, None) => false,
    }
}

impl FunctionTransform for DropFilter {
    fn transform(&mut self, output: &mut Vec<LogRecord>, mut record: LogRecord) {
        if self.should_drop(&record.to_document()) {
            emit!(FilterDropped {
                pipeline: &self.pipeline,
                filter: &self.name,
            });
            record.finalize(EventStatus::Dropped);
        } else {
            output.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::event::{KubernetesMeta, LogSource, LogType};

    fn filter() -> DropFilter {
        let tests: Vec<DropTest> = serde_yaml::from_str(
            r#"
- test:
    - field: .level
      matches: "debug|trace"
    - field: .kubernetes.namespace_name
      notMatches: "^prod-"
- test:
    - field: .message
      matches: "^healthz"
"#,
        )
        .unwrap();
        DropFilter::new("p", "quiet", &tests)
    }

    fn record(message: &str, level: Option<&str>, namespace: &str) -> LogRecord {
        let mut record = LogRecord::new(message, LogType::Application, LogSource::Container, Arc::from("s"));
        record.level = level.map(str::to_string);
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: namespace.into(),
            ..Default::default()
        });
        record
    }

    #[rstest]
    #[case("hello", Some("debug"), "dev-1", true)]
    #[case("hello", Some("debug"), "prod-1", false)]
    #[case("hello", Some("info"), "dev-1", false)]
    #[case("hello", None, "dev-1", false)]
    #[case("healthz ok", Some("info"), "prod-1", true)]
    fn drops_when_any_test_passes(
        #[case] message: &str,
        #[case] level: Option<&str>,
        #[case] namespace: &str,
        #[case] dropped: bool,
    ) {
        let mut output = Vec::new();
        filter().transform(&mut output, record(message, level, namespace));
        assert_eq!(output.is_empty(), dropped);
    }

    #[test]
    fn missing_field_compares_as_empty() {
        let tests: Vec<DropTest> =
            serde_yaml::from_str("- test:\n    - field: .structured.user\n      notMatches: \".+\"\n")
                .unwrap();
        let mut output = Vec::new();
        DropFilter::new("p", "anon", &tests).transform(&mut output, record("m", None, "ns"));
        assert!(output.is_empty());
    }
}
