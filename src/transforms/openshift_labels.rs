use std::collections::BTreeMap;

use super::FunctionTransform;
use crate::event::LogRecord;

/// Adds fixed labels under `openshift.labels`, replacing labels of the same name.
pub struct OpenshiftLabels {
    labels: BTreeMap<String, String>,
}

impl OpenshiftLabels {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

impl FunctionTransform for OpenshiftLabels {
    fn transform(&mut self, output: &mut Vec<LogRecord>, mut record: LogRecord) {
        record.openshift_labels.extend(
            self.labels
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        output.push(record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::event::{LogSource, LogType};

    #[test]
    fn labels_land_in_document() {
        let mut transform = OpenshiftLabels::new(BTreeMap::from([
            ("env".to_string(), "prod".to_string()),
            ("region".to_string(), "east".to_string()),
        ]));
        let mut record = LogRecord::new("m", LogType::Application, LogSource::Container, Arc::from("s"));
        record
            .openshift_labels
            .insert("env".into(), "dev".into());

        let mut output = Vec::new();
        transform.transform(&mut output, record);

        let doc = output[0].to_document();
        assert_eq!(doc["openshift"]["labels"], json!({"env": "prod", "region": "east"}));
    }
}
