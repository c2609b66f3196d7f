//! Per record processing steps.
//!
//! The normalizer runs once on every record read. Filters run inside the pipelines that name them,
//! so the same record may be transformed differently on its way to different outputs.

use std::time::Instant;

use crate::{
    config::{FilterKind, FilterSpec},
    event::LogRecord,
};

pub mod detect_exceptions;
pub mod drop;
pub mod normalize;
pub mod openshift_labels;
pub mod parse;
pub mod prune;
pub mod throttle;

/// A step that maps one record to zero or more records.
///
/// Transforms that hold records back, such as the exception detector, release them through the
/// flush methods.
pub trait FunctionTransform: Send {
    fn transform(&mut self, output: &mut Vec<LogRecord>, record: LogRecord);

    /// Emits records held back for longer than the transform allows.
    fn flush_expired(&mut self, _output: &mut Vec<LogRecord>, _now: Instant) {}

    /// Emits every record held back.
    fn flush(&mut self, _output: &mut Vec<LogRecord>) {}
}

/// Builds the transform for a configured filter used by `pipeline`.
pub fn build(filter: &FilterSpec, pipeline: &str) -> Box<dyn FunctionTransform> {
    match &filter.kind {
        FilterKind::OpenshiftLabels { labels } => {
            Box::new(openshift_labels::OpenshiftLabels::new(labels.clone()))
        }
        FilterKind::DetectMultilineException => {
            Box::new(detect_exceptions::DetectExceptions::default())
        }
        FilterKind::Parse => Box::new(parse::ParseJson),
        FilterKind::Drop { drop } => Box::new(drop::DropFilter::new(pipeline, &filter.name, drop)),
        FilterKind::Prune { prune } => Box::new(prune::Prune::new(prune)),
    }
}

/// The ordered filters of one pipeline.
#[derive(Default)]
pub struct FilterChain {
    transforms: Vec<Box<dyn FunctionTransform>>,
}

impl FilterChain {
    pub fn new(transforms: Vec<Box<dyn FunctionTransform>>) -> Self {
        Self { transforms }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn process(&mut self, record: LogRecord, output: &mut Vec<LogRecord>) {
        self.run_from(0, vec![record], output);
    }

    pub fn flush_expired(&mut self, output: &mut Vec<LogRecord>, now: Instant) {
        for index in 0..self.transforms.len() {
            let mut released = Vec::new();
            self.transforms[index].flush_expired(&mut released, now);
            self.run_from(index + 1, released, output);
        }
    }

    pub fn flush(&mut self, output: &mut Vec<LogRecord>) {
        for index in 0..self.transforms.len() {
            let mut released = Vec::new();
            self.transforms[index].flush(&mut released);
            self.run_from(index + 1, released, output);
        }
    }

    fn run_from(&mut self, start: usize, mut batch: Vec<LogRecord>, output: &mut Vec<LogRecord>) {
        for transform in self.transforms.iter_mut().skip(start) {
            if batch.is_empty() {
                return;
            }
            let mut next = Vec::with_capacity(batch.len());
            for record in batch.drain(..) {
                transform.transform(&mut next, record);
            }
            batch = next;
        }
        output.extend(batch);
    }
}
