use super::FunctionTransform;
use crate::{
    config::{PruneSpec, REQUIRED_FIELDS},
    event::{FieldPath, LogRecord, retain_paths},
};

/// The `prune` filter. `in` fields are removed first, then everything outside `notIn` is.
///
/// The fields every output needs are never removed.
pub struct Prune {
    remove: Vec<FieldPath>,
    keep: Option<Vec<FieldPath>>,
}

impl Prune {
    pub fn new(spec: &PruneSpec) -> Self {
        let required: Vec<FieldPath> = REQUIRED_FIELDS
            .iter()
            .filter_map(|field| FieldPath::parse(field).ok())
            .collect();
        let remove = spec
            .remove
            .iter()
            .flatten()
            .filter(|path| !required.iter().any(|req| req.starts_with(path) || path.starts_with(req)))
            .cloned()
            .collect();
        let keep = spec.keep.as_ref().map(|keep| {
            let mut keep = keep.clone();
            keep.extend(required);
            keep
        });
        Self { remove, keep }
    }
}

impl FunctionTransform for Prune {
    fn transform(&mut self, output: &mut Vec<LogRecord>, mut record: LogRecord) {
        let mut doc = record.to_document();
        for path in &self.remove {
            path.remove(&mut doc);
        }
        if let Some(keep) = &self.keep {
            doc = retain_paths(&doc, keep);
        }
        record.set_document(doc);
        output.push(record);
    }
}
