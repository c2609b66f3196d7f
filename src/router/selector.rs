//! Compiled input selectors.

use std::collections::BTreeMap;

use glob::Pattern;
use snafu::{ResultExt, Snafu};

use crate::{
    config::{
        ApplicationInput, AuditSource, InfrastructureSource, InputKind, InputSpec, LabelSelector,
        LabelSelectorRequirement, NamespaceContainerSpec, SelectorOperator,
    },
    event::{LogRecord, LogSource, LogType},
    transforms::throttle::Throttle,
};

#[derive(Debug, Snafu)]
pub enum SelectorError {
    #[snafu(display("input {}: invalid glob {:?}: {}", input, glob, source))]
    InvalidGlob {
        input: String,
        glob: String,
        source: glob::PatternError,
    },
}

/// A namespace/container pair of globs. Each glob must match the whole name.
#[derive(Debug)]
struct NamespaceContainer {
    namespace: Option<Pattern>,
    container: Option<Pattern>,
}

impl NamespaceContainer {
    fn compile(input: &str, spec: &NamespaceContainerSpec) -> Result<Self, SelectorError> {
        let compile = |glob: &Option<String>| {
            glob.as_deref()
                .map(|glob| {
                    Pattern::new(glob).context(InvalidGlobSnafu {
                        input: input.to_string(),
                        glob: glob.to_string(),
                    })
                })
                .transpose()
        };
        Ok(Self {
            namespace: compile(&spec.namespace)?,
            container: compile(&spec.container)?,
        })
    }

    fn matches(&self, namespace: &str, container: &str) -> bool {
        self.namespace
            .as_ref()
            .is_none_or(|pattern| pattern.matches(namespace))
            && self
                .container
                .as_ref()
                .is_none_or(|pattern| pattern.matches(container))
    }

    /// Whether an infrastructure namespace was named on purpose rather than by a catch-all.
    fn names_namespace(&self, namespace: &str) -> bool {
        self.namespace
            .as_ref()
            .is_some_and(|pattern| pattern.as_str() != "*" && pattern.matches(namespace))
    }
}

fn requirement_holds(requirement: &LabelSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let value = labels.get(&requirement.key);
    match requirement.operator {
        SelectorOperator::In => value.is_some_and(|value| requirement.values.contains(value)),
        SelectorOperator::NotIn => value.is_none_or(|value| !requirement.values.contains(value)),
        SelectorOperator::Exists => value.is_some(),
        SelectorOperator::DoesNotExist => value.is_none(),
    }
}

/// `matchLabels` entries must all be present and equal; every expression must hold.
pub fn label_selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    selector
        .match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
        && selector
            .match_expressions
            .iter()
            .all(|requirement| requirement_holds(requirement, labels))
}

#[derive(Debug)]
struct ApplicationSelector {
    includes: Vec<NamespaceContainer>,
    excludes: Vec<NamespaceContainer>,
    labels: Option<LabelSelector>,
}

impl ApplicationSelector {
    fn compile(input: &str, spec: &ApplicationInput) -> Result<Self, SelectorError> {
        Ok(Self {
            includes: spec
                .includes
                .iter()
                .map(|include| NamespaceContainer::compile(input, include))
                .collect::<Result<_, _>>()?,
            excludes: spec
                .excludes
                .iter()
                .map(|exclude| NamespaceContainer::compile(input, exclude))
                .collect::<Result<_, _>>()?,
            labels: spec.selector.clone(),
        })
    }

    fn matches(&self, record: &LogRecord) -> bool {
        let Some(meta) = record.kubernetes.as_ref() else {
            return false;
        };
        if record.log_source != LogSource::Container {
            return false;
        }
        let (namespace, container) = (meta.namespace_name.as_str(), meta.container_name.as_str());

        // Infrastructure containers only count as application logs when included by name.
        let included = match record.log_type {
            LogType::Application => {
                self.includes.is_empty()
                    || self
                        .includes
                        .iter()
                        .any(|include| include.matches(namespace, container))
            }
            LogType::Infrastructure => self.includes.iter().any(|include| {
                include.names_namespace(namespace) && include.matches(namespace, container)
            }),
            LogType::Audit => false,
        };

        included
            && !self
                .excludes
                .iter()
                .any(|exclude| exclude.matches(namespace, container))
            && self
                .labels
                .as_ref()
                .is_none_or(|selector| label_selector_matches(selector, &meta.labels))
    }
}

#[derive(Debug)]
enum Predicate {
    Application(ApplicationSelector),
    Infrastructure(Vec<InfrastructureSource>),
    Audit(Vec<AuditSource>),
}

/// A compiled input: a pure predicate, plus the optional per-container rate limit.
#[derive(Debug)]
pub struct InputSelector {
    name: String,
    predicate: Predicate,
    per_container: Option<Throttle>,
}

impl InputSelector {
    pub fn compile(spec: &InputSpec) -> Result<Self, SelectorError> {
        let (predicate, per_container) = match &spec.kind {
            InputKind::Application { application } => (
                Predicate::Application(ApplicationSelector::compile(&spec.name, application)?),
                application
                    .tuning
                    .as_ref()
                    .and_then(|tuning| tuning.rate_limit_per_container)
                    .map(|limit| Throttle::new(format!("input/{}", spec.name), limit)),
            ),
            InputKind::Infrastructure { infrastructure } => (
                Predicate::Infrastructure(infrastructure.sources.clone()),
                None,
            ),
            InputKind::Audit { audit } => (Predicate::Audit(audit.sources.clone()), None),
        };
        Ok(Self {
            name: spec.name.clone(),
            predicate,
            per_container,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        match &self.predicate {
            Predicate::Application(selector) => selector.matches(record),
            Predicate::Infrastructure(sources) => match record.log_source {
                LogSource::Container => {
                    record.log_type == LogType::Infrastructure
                        && sources.contains(&InfrastructureSource::Container)
                }
                LogSource::Node => sources.contains(&InfrastructureSource::Node),
                _ => false,
            },
            Predicate::Audit(sources) => {
                let source = match record.log_source {
                    LogSource::Auditd => AuditSource::Auditd,
                    LogSource::KubeApi => AuditSource::KubeApi,
                    LogSource::OpenshiftApi => AuditSource::OpenshiftApi,
                    LogSource::Ovn => AuditSource::Ovn,
                    LogSource::Container | LogSource::Node => return false,
                };
                sources.contains(&source)
            }
        }
    }

    /// [`InputSelector::matches`], then counts the record against the container's rate limit.
    pub fn admit(&mut self, record: &LogRecord) -> bool {
        if !self.matches(record) {
            return false;
        }
        match (&mut self.per_container, &record.kubernetes) {
            (Some(throttle), Some(meta)) => throttle.check(&meta.container_key()),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::event::KubernetesMeta;

    fn selector(yaml: &str) -> InputSelector {
        InputSelector::compile(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    fn reserved(name: &str) -> InputSelector {
        InputSelector::compile(&InputSpec::reserved(name).unwrap()).unwrap()
    }

    fn container(
        namespace: &str,
        container: &str,
        labels: &[(&str, &str)],
        log_type: LogType,
    ) -> LogRecord {
        let mut record = LogRecord::new("m", log_type, LogSource::Container, Arc::from("s"));
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: namespace.into(),
            pod_name: "pod".into(),
            container_name: container.into(),
            labels: labels
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            ..Default::default()
        });
        record
    }

    fn app(namespace: &str) -> LogRecord {
        container(namespace, "c", &[], LogType::Application)
    }

    #[test]
    fn include_and_exclude_namespaces() {
        let narrowed = selector(
            r#"
name: my-app
type: application
application:
  includes:
    - namespace: "*71778*"
  excludes:
    - namespace: e2e-71778-ns1
"#,
        );
        let ns0 = app("e2e-71778-ns0");
        let ns1 = app("e2e-71778-ns1");
        assert!(narrowed.matches(&ns0));
        assert!(!narrowed.matches(&ns1));
        assert!(!narrowed.matches(&app("other")));

        let include_only = selector(
            "name: my-app\ntype: application\napplication:\n  includes:\n    - namespace: \"*71778*\"\n",
        );
        assert!(include_only.matches(&ns1));
    }

    #[test]
    fn excludes_apply_to_everything() {
        let selector = selector(
            "name: a\ntype: application\napplication:\n  excludes:\n    - namespace: ns1\n",
        );
        assert!(selector.matches(&app("ns0")));
        assert!(!selector.matches(&app("ns1")));
    }

    #[test]
    fn globs_are_anchored() {
        let selector = selector(
            "name: a\ntype: application\napplication:\n  includes:\n    - namespace: app\n      container: \"web*\"\n",
        );
        assert!(selector.matches(&container("app", "web-1", &[], LogType::Application)));
        assert!(!selector.matches(&container("my-app", "web-1", &[], LogType::Application)));
        assert!(!selector.matches(&container("app", "api-web", &[], LogType::Application)));
    }

    #[test]
    fn reserved_application_selects_application_containers() {
        let selector = reserved("application");
        assert!(selector.matches(&app("appproj")));
        assert!(!selector.matches(&container("openshift-dns", "dns", &[], LogType::Infrastructure)));
        assert!(!selector.matches(&LogRecord::new("m", LogType::Infrastructure, LogSource::Node, Arc::from("j"))));
    }

    #[test]
    fn infrastructure_namespaces_need_explicit_include() {
        let wildcard = selector(
            "name: a\ntype: application\napplication:\n  includes:\n    - namespace: \"*\"\n",
        );
        let named = selector(
            "name: a\ntype: application\napplication:\n  includes:\n    - namespace: \"openshift-*\"\n",
        );
        let record = container("openshift-dns", "dns", &[], LogType::Infrastructure);
        assert!(!wildcard.matches(&record));
        assert!(named.matches(&record));
    }

    #[test]
    fn label_selector() {
        let selector = selector(
            r#"
name: a
type: application
application:
  selector:
    matchLabels:
      run: centos-logtest
      test: centos-logtest
    matchExpressions:
      - key: tier
        operator: In
        values: [frontend, api]
      - key: canary
        operator: DoesNotExist
"#,
        );
        let both = [("run", "centos-logtest"), ("test", "centos-logtest")];
        let with = |extra: &[(&'static str, &'static str)]| {
            let mut labels = both.to_vec();
            labels.extend_from_slice(extra);
            container("ns", "c", &labels, LogType::Application)
        };

        assert!(selector.matches(&with(&[("tier", "api")])));
        assert!(!selector.matches(&with(&[("tier", "db")])));
        assert!(!selector.matches(&with(&[("tier", "api"), ("canary", "true")])));
        assert!(!selector.matches(&container(
            "ns",
            "c",
            &[("run", "centos-logtest"), ("tier", "api")],
            LogType::Application
        )));
    }

    #[rstest]
    #[case(SelectorOperator::In, Some("a"), true)]
    #[case(SelectorOperator::In, None, false)]
    #[case(SelectorOperator::NotIn, Some("a"), false)]
    #[case(SelectorOperator::NotIn, Some("z"), true)]
    #[case(SelectorOperator::NotIn, None, true)]
    #[case(SelectorOperator::Exists, Some("z"), true)]
    #[case(SelectorOperator::Exists, None, false)]
    #[case(SelectorOperator::DoesNotExist, None, true)]
    fn expression_operators(
        #[case] operator: SelectorOperator,
        #[case] value: Option<&str>,
        #[case] expected: bool,
    ) {
        let requirement = LabelSelectorRequirement {
            key: "k".into(),
            operator,
            values: vec!["a".into(), "b".into()],
        };
        let labels = value
            .map(|value| BTreeMap::from([("k".to_string(), value.to_string())]))
            .unwrap_or_default();
        assert_eq!(requirement_holds(&requirement, &labels), expected);
    }

    #[test]
    fn infrastructure_and_audit_sources() {
        let infra = reserved("infrastructure");
        let node = LogRecord::new("m", LogType::Infrastructure, LogSource::Node, Arc::from("j"));
        assert!(infra.matches(&node));
        assert!(infra.matches(&container("kube-system", "c", &[], LogType::Infrastructure)));
        assert!(!infra.matches(&app("ns0")));

        let node_only = selector("name: n\ntype: infrastructure\ninfrastructure:\n  sources: [node]\n");
        assert!(node_only.matches(&node));
        assert!(!node_only.matches(&container("kube-system", "c", &[], LogType::Infrastructure)));

        let ovn = selector("name: o\ntype: audit\naudit:\n  sources: [ovn]\n");
        assert!(ovn.matches(&LogRecord::new("m", LogType::Audit, LogSource::Ovn, Arc::from("o"))));
        assert!(!ovn.matches(&LogRecord::new("m", LogType::Audit, LogSource::KubeApi, Arc::from("k"))));
    }

    #[test]
    fn per_container_rate_limit() {
        let mut selector = selector(
            "name: a\ntype: application\napplication:\n  tuning:\n    rateLimitPerContainer:\n      maxRecordsPerSecond: 2\n",
        );
        let web = container("ns", "web", &[], LogType::Application);
        let api = container("ns", "api", &[], LogType::Application);
        let admitted = (0..5).filter(|_| selector.admit(&web)).count();
        assert_eq!(admitted, 2);
        assert!(selector.admit(&api));
    }

    proptest! {
        #[test]
        fn match_labels_is_subset_equality(
            labels in prop::collection::btree_map("[a-z]{1,4}", "[a-z]{1,4}", 0..6),
            required in prop::collection::btree_map("[a-z]{1,4}", "[a-z]{1,4}", 0..3),
        ) {
            let selector = LabelSelector { match_labels: required.clone(), match_expressions: vec![] };
            let expected = required.iter().all(|(key, value)| labels.get(key) == Some(value));
            prop_assert_eq!(label_selector_matches(&selector, &labels), expected);
        }
    }
}
