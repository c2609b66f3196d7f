//! Decides which outputs every record goes to.
//!
//! A record is offered to every pipeline whose inputs select it. Each output receives the record
//! at most once: the first pipeline, in declaration order, that selects the record and lists the
//! output claims it, and only that pipeline's filters are applied for the output.

use std::time::Instant;

use snafu::Snafu;

use crate::{
    config::{ForwarderConfig, ParseKind},
    event::{EventStatus, Finalizable, LogRecord},
    internal_events::RouteUnmatched,
    transforms::{self, FilterChain, FunctionTransform, parse::ParseJson, throttle::Throttle},
};

mod selector;

pub use self::selector::{InputSelector, SelectorError, label_selector_matches};

#[derive(Debug, Snafu)]
pub enum RouterError {
    #[snafu(display("{}", source))]
    Selector { source: SelectorError },
    #[snafu(display("pipeline {}: unknown input {:?}", pipeline, name))]
    UnknownInput { pipeline: String, name: String },
    #[snafu(display("pipeline {}: unknown output {:?}", pipeline, name))]
    UnknownOutput { pipeline: String, name: String },
    #[snafu(display("pipeline {}: unknown filter {:?}", pipeline, name))]
    UnknownFilter { pipeline: String, name: String },
}

impl From<SelectorError> for RouterError {
    fn from(source: SelectorError) -> Self {
        Self::Selector { source }
    }
}

struct Pipeline {
    name: String,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    filters: FilterChain,
}

/// A record bound for the output at `output`, an index into [`Router::outputs`].
#[derive(Debug)]
pub struct Routed {
    pub output: usize,
    pub record: LogRecord,
}

pub struct Router {
    inputs: Vec<InputSelector>,
    pipelines: Vec<Pipeline>,
    outputs: Vec<String>,
    rate_limits: Vec<Option<Throttle>>,
}

impl Router {
    /// Compiles the pipelines of `config`. Outputs no pipeline refers to get no index.
    pub fn new(config: &ForwarderConfig) -> Result<Self, RouterError> {
        let mut inputs: Vec<InputSelector> = Vec::new();
        let mut outputs: Vec<String> = Vec::new();
        let mut rate_limits = Vec::new();
        let mut pipelines = Vec::with_capacity(config.pipelines.len());

        for spec in &config.pipelines {
            let mut pipeline_inputs = Vec::new();
            for name in &spec.input_refs {
                let index = match inputs.iter().position(|input| input.name() == name) {
                    Some(index) => index,
                    None => {
                        let input = config.input(name).ok_or_else(|| RouterError::UnknownInput {
                            pipeline: spec.name.clone(),
                            name: name.clone(),
                        })?;
                        inputs.push(InputSelector::compile(&input)?);
                        inputs.len() - 1
                    }
                };
                if !pipeline_inputs.contains(&index) {
                    pipeline_inputs.push(index);
                }
            }

            let mut pipeline_outputs = Vec::new();
            for name in &spec.output_refs {
                let index = match outputs.iter().position(|output| output == name) {
                    Some(index) => index,
                    None => {
                        let output =
                            config.output(name).ok_or_else(|| RouterError::UnknownOutput {
                                pipeline: spec.name.clone(),
                                name: name.clone(),
                            })?;
                        outputs.push(output.name.clone());
                        rate_limits.push(
                            output
                                .rate_limit
                                .map(|limit| Throttle::new(format!("output/{name}"), limit)),
                        );
                        outputs.len() - 1
                    }
                };
                if !pipeline_outputs.contains(&index) {
                    pipeline_outputs.push(index);
                }
            }

            let mut filters: Vec<Box<dyn FunctionTransform>> = Vec::new();
            if spec.parse == Some(ParseKind::Json) {
                filters.push(Box::new(ParseJson));
            }
            for name in &spec.filter_refs {
                let filter = config.filter(name).ok_or_else(|| RouterError::UnknownFilter {
                    pipeline: spec.name.clone(),
                    name: name.clone(),
                })?;
                filters.push(transforms::build(filter, &spec.name));
            }

            pipelines.push(Pipeline {
                name: spec.name.clone(),
                inputs: pipeline_inputs,
                outputs: pipeline_outputs,
                filters: FilterChain::new(filters),
            });
        }

        Ok(Self {
            inputs,
            pipelines,
            outputs,
            rate_limits,
        })
    }

    /// Names of the outputs records can be routed to, by index.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.iter().map(|pipeline| pipeline.name.as_str())
    }

    /// Outputs `pipeline` claims for a record selected by the pipelines in `selected`.
    fn claims(&self, pipeline: usize, selected: &[bool]) -> Vec<usize> {
        self.pipelines[pipeline]
            .outputs
            .iter()
            .copied()
            .filter(|output| {
                !self.pipelines[..pipeline]
                    .iter()
                    .zip(selected)
                    .any(|(earlier, selected)| *selected && earlier.outputs.contains(output))
            })
            .collect()
    }

    fn selected_by(&self, record: &LogRecord) -> Vec<bool> {
        let inputs: Vec<bool> = self.inputs.iter().map(|input| input.matches(record)).collect();
        self.pipelines
            .iter()
            .map(|pipeline| pipeline.inputs.iter().any(|input| inputs[*input]))
            .collect()
    }

    pub fn route(&mut self, mut record: LogRecord) -> Vec<Routed> {
        let mut routed = Vec::new();

        let mut matched_any = false;
        let mut admitted = Vec::with_capacity(self.inputs.len());
        for input in &mut self.inputs {
            let matches = input.matches(&record);
            matched_any |= matches;
            admitted.push(matches && input.admit(&record));
        }
        let selected: Vec<bool> = self
            .pipelines
            .iter()
            .map(|pipeline| pipeline.inputs.iter().any(|input| admitted[*input]))
            .collect();

        let work: Vec<(usize, Vec<usize>)> = (0..self.pipelines.len())
            .filter(|pipeline| selected[*pipeline])
            .map(|pipeline| (pipeline, self.claims(pipeline, &selected)))
            .filter(|(_, claims)| !claims.is_empty())
            .collect();

        if work.is_empty() {
            if !matched_any {
                emit!(RouteUnmatched {
                    source_id: &record.source_id,
                });
            }
            record.finalize(EventStatus::Dropped);
            return routed;
        }

        let last = work.len() - 1;
        let mut pending = Some(record);
        for (position, (pipeline, claims)) in work.into_iter().enumerate() {
            let copy = if position == last {
                pending.take()
            } else {
                pending.clone()
            };
            let Some(copy) = copy else { break };

            let mut emitted = Vec::new();
            self.pipelines[pipeline].filters.process(copy, &mut emitted);
            for record in emitted {
                self.deliver(record, &claims, &mut routed);
            }
        }
        routed
    }

    /// Releases records filters held back for too long.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<Routed> {
        self.flush_with(|filters, output| filters.flush_expired(output, now))
    }

    /// Releases every record filters hold back, before a shutdown or reload.
    pub fn flush(&mut self) -> Vec<Routed> {
        self.flush_with(FilterChain::flush)
    }

    fn flush_with(&mut self, flush: impl Fn(&mut FilterChain, &mut Vec<LogRecord>)) -> Vec<Routed> {
        let mut routed = Vec::new();
        for pipeline in 0..self.pipelines.len() {
            let mut released = Vec::new();
            flush(&mut self.pipelines[pipeline].filters, &mut released);
            for record in released {
                let claims = self.claims(pipeline, &self.selected_by(&record));
                self.deliver(record, &claims, &mut routed);
            }
        }
        routed
    }

    fn deliver(&mut self, record: LogRecord, claims: &[usize], routed: &mut Vec<Routed>) {
        let mut pending = Some(record);
        for (position, output) in claims.iter().enumerate() {
            let copy = if position + 1 == claims.len() {
                pending.take()
            } else {
                pending.clone()
            };
            let Some(mut copy) = copy else { break };

            if let Some(throttle) = &mut self.rate_limits[*output] {
                if !throttle.check("") {
                    copy.finalize(EventStatus::Dropped);
                    continue;
                }
            }
            routed.push(Routed {
                output: *output,
                record: copy,
            });
        }
        if let Some(mut unclaimed) = pending {
            unclaimed.finalize(EventStatus::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use file_source::CheckpointsView;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        config::{Format, load_from_str},
        event::{AckPosition, KubernetesMeta, LogSource, LogType, SourceProgress},
    };

    const OUTPUTS: &str = r#"
outputs:
  - name: es
    type: elasticsearch
    url: http://es:9200
  - name: loki
    type: loki
    url: http://loki:3100
  - name: splunk
    type: splunk
    url: http://splunk:8088
    splunk:
      hecToken: t
"#;

    fn router(rest: &str) -> Router {
        let config = load_from_str(&format!("{OUTPUTS}{rest}"), Format::Yaml).unwrap();
        Router::new(&config).unwrap()
    }

    fn app(namespace: &str, message: &str) -> LogRecord {
        let mut record = LogRecord::new(message, LogType::Application, LogSource::Container, Arc::from("s"));
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: namespace.into(),
            pod_name: "pod".into(),
            container_name: "c".into(),
            ..Default::default()
        });
        record
    }

    fn by_output(router: &Router, routed: &[Routed]) -> HashMap<String, Vec<String>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for routed in routed {
            grouped
                .entry(router.outputs()[routed.output].clone())
                .or_default()
                .push(routed.record.message.clone());
        }
        grouped
    }

    #[test]
    fn unmatched_records_reach_no_output() {
        let mut router = router(
            "pipelines:\n  - name: audit\n    inputRefs: [audit]\n    outputRefs: [es]\n",
        );
        assert!(router.route(app("ns0", "m")).is_empty());
    }

    #[test]
    fn include_exclude_routing() {
        let mut router = router(
            r#"
inputs:
  - name: selected
    type: application
    application:
      includes:
        - namespace: "*71778*"
      excludes:
        - namespace: "*ns1"
pipelines:
  - name: p
    inputRefs: [selected]
    outputRefs: [loki]
"#,
        );
        assert_eq!(router.route(app("e2e-71778-ns0", "kept")).len(), 1);
        assert!(router.route(app("e2e-71778-ns1", "excluded")).is_empty());
        assert!(router.route(app("ns0", "not included")).is_empty());
    }

    #[test]
    fn outputs_receive_each_record_once() {
        let mut router = router(
            r#"
filters:
  - name: tag
    type: openshiftLabels
    openshiftLabels:
      via: second
pipelines:
  - name: first
    inputRefs: [application]
    outputRefs: [es, loki]
  - name: second
    inputRefs: [application, infrastructure]
    outputRefs: [loki, splunk]
    filterRefs: [tag]
"#,
        );
        let routed = router.route(app("ns0", "m"));
        let outputs: Vec<&str> = routed
            .iter()
            .map(|routed| router.outputs()[routed.output].as_str())
            .collect();
        assert_eq!(outputs, vec!["es", "loki", "splunk"]);

        let labels: Vec<bool> = routed
            .iter()
            .map(|routed| routed.record.openshift_labels.contains_key("via"))
            .collect();
        assert_eq!(labels, vec![false, false, true]);

        // Infrastructure records only match the second pipeline, which then claims loki too.
        let mut infra = app("openshift-dns", "m");
        infra.log_type = LogType::Infrastructure;
        let routed = router.route(infra);
        let outputs: Vec<&str> = routed
            .iter()
            .map(|routed| router.outputs()[routed.output].as_str())
            .collect();
        assert_eq!(outputs, vec!["loki", "splunk"]);
    }

    #[test]
    fn pipeline_filters_apply_per_output() {
        let mut router = router(
            r#"
filters:
  - name: no-debug
    type: drop
    drop:
      - test:
          - field: .message
            matches: debug
pipelines:
  - name: filtered
    inputRefs: [application]
    outputRefs: [es]
    filterRefs: [no-debug]
  - name: everything
    inputRefs: [application]
    outputRefs: [loki]
"#,
        );
        let mut routed = router.route(app("ns0", "debug line"));
        routed.extend(router.route(app("ns0", "info line")));
        let grouped = by_output(&router, &routed);
        assert_eq!(grouped["es"], vec!["info line"]);
        assert_eq!(grouped["loki"], vec!["debug line", "info line"]);
    }

    #[test]
    fn output_rate_limit() {
        let config = load_from_str(
            r#"
outputs:
  - name: es
    type: elasticsearch
    url: http://es:9200
    rateLimit:
      maxRecordsPerSecond: 3
pipelines:
  - name: p
    inputRefs: [application]
    outputRefs: [es]
"#,
            Format::Yaml,
        )
        .unwrap();
        let mut router = Router::new(&config).unwrap();
        let delivered: usize = (0..10).map(|_| router.route(app("ns0", "m")).len()).sum();
        assert_eq!(delivered, 3);
    }

    #[test]
    fn dropped_records_complete_their_finalizers() {
        let view = Arc::new(CheckpointsView::default());
        let progress = SourceProgress::new(Arc::from("s"), Arc::clone(&view));
        let mut router = router(
            "pipelines:\n  - name: audit\n    inputRefs: [audit]\n    outputRefs: [es]\n",
        );

        let record = app("ns0", "m").with_finalizers(progress.finalizer(AckPosition::File {
            fingerprint: file_source::FileFingerprint::DevInode(1, 1),
            offset: 7,
        }));
        assert!(router.route(record).is_empty());
        assert_eq!(progress.pending(), 0);
        assert!(!progress.is_stalled());
        assert_eq!(view.get("s").unwrap().position, 7);
    }

    #[test]
    fn held_records_are_flushed_to_their_outputs() {
        let mut router = router(
            r#"
filters:
  - name: traces
    type: detectMultilineException
pipelines:
  - name: p
    inputRefs: [application]
    outputRefs: [es, loki]
    filterRefs: [traces]
"#,
        );
        assert!(router.route(app("ns0", "Error: boom")).is_empty());
        assert!(router.route(app("ns0", "    at main (index.js:1:1)")).is_empty());

        let routed = router.flush();
        let grouped = by_output(&router, &routed);
        assert_eq!(grouped["es"], vec!["Error: boom\n    at main (index.js:1:1)"]);
        assert_eq!(grouped["loki"], grouped["es"]);
    }

    #[test]
    fn unknown_refs_fail() {
        let mut config = load_from_str(
            &format!("{OUTPUTS}pipelines:\n  - name: p\n    inputRefs: [application]\n    outputRefs: [es]\n"),
            Format::Yaml,
        )
        .unwrap();
        config.pipelines[0].output_refs.push("missing".into());
        assert!(matches!(
            Router::new(&config),
            Err(RouterError::UnknownOutput { .. })
        ));
    }
}
