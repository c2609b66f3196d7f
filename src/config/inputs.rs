use std::collections::BTreeMap;

use serde::Deserialize;

use super::LimitSpec;

pub const RESERVED_APPLICATION: &str = "application";
pub const RESERVED_INFRASTRUCTURE: &str = "infrastructure";
pub const RESERVED_AUDIT: &str = "audit";

/// A named selection of logs that pipelines refer to through `inputRefs`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InputSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: InputKind,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputKind {
    Application {
        #[serde(default)]
        application: ApplicationInput,
    },
    Infrastructure {
        #[serde(default)]
        infrastructure: InfrastructureInput,
    },
    Audit {
        #[serde(default)]
        audit: AuditInput,
    },
}

impl InputSpec {
    /// The implicit inputs every configuration can refer to without declaring them.
    pub fn reserved(name: &str) -> Option<Self> {
        let kind = match name {
            RESERVED_APPLICATION => InputKind::Application {
                application: ApplicationInput::default(),
            },
            RESERVED_INFRASTRUCTURE => InputKind::Infrastructure {
                infrastructure: InfrastructureInput::default(),
            },
            RESERVED_AUDIT => InputKind::Audit {
                audit: AuditInput::default(),
            },
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            kind,
        })
    }

    pub fn is_reserved_name(name: &str) -> bool {
        matches!(
            name,
            RESERVED_APPLICATION | RESERVED_INFRASTRUCTURE | RESERVED_AUDIT
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplicationInput {
    #[serde(default)]
    pub includes: Vec<NamespaceContainerSpec>,
    #[serde(default)]
    pub excludes: Vec<NamespaceContainerSpec>,
    pub selector: Option<LabelSelector>,
    pub tuning: Option<ContainerInputTuning>,
}

/// A pair of globs; an absent side matches everything.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NamespaceContainerSpec {
    pub namespace: Option<String>,
    pub container: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerInputTuning {
    pub rate_limit_per_container: Option<LimitSpec>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InfrastructureInput {
    #[serde(default = "InfrastructureSource::all")]
    pub sources: Vec<InfrastructureSource>,
}

impl Default for InfrastructureInput {
    fn default() -> Self {
        Self {
            sources: InfrastructureSource::all(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InfrastructureSource {
    Container,
    Node,
}

impl InfrastructureSource {
    fn all() -> Vec<Self> {
        vec![Self::Container, Self::Node]
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditInput {
    #[serde(default = "AuditSource::all")]
    pub sources: Vec<AuditSource>,
}

impl Default for AuditInput {
    fn default() -> Self {
        Self {
            sources: AuditSource::all(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum AuditSource {
    #[serde(rename = "auditd")]
    Auditd,
    #[serde(rename = "kubeAPI")]
    KubeApi,
    #[serde(rename = "openshiftAPI")]
    OpenshiftApi,
    #[serde(rename = "ovn")]
    Ovn,
}

impl AuditSource {
    fn all() -> Vec<Self> {
        vec![Self::Auditd, Self::KubeApi, Self::OpenshiftApi, Self::Ovn]
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn application_input() {
        let input: InputSpec = serde_yaml::from_str(
            r#"
name: my-app
type: application
application:
  includes:
    - namespace: "*71778*"
  excludes:
    - namespace: ns1
      container: sidecar
  selector:
    matchLabels:
      run: centos-logtest
    matchExpressions:
      - key: tier
        operator: NotIn
        values: [cache]
  tuning:
    rateLimitPerContainer:
      maxRecordsPerSecond: 10
"#,
        )
        .unwrap();

        let InputKind::Application { application } = input.kind else {
            panic!("expected an application input");
        };
        assert_eq!(
            application.includes,
            vec![NamespaceContainerSpec {
                namespace: Some("*71778*".into()),
                container: None,
            }]
        );
        assert_eq!(application.excludes[0].container.as_deref(), Some("sidecar"));
        let selector = application.selector.unwrap();
        assert_eq!(selector.match_labels["run"], "centos-logtest");
        assert_eq!(selector.match_expressions[0].operator, SelectorOperator::NotIn);
        assert_eq!(
            application
                .tuning
                .unwrap()
                .rate_limit_per_container
                .unwrap()
                .max_records_per_second,
            10
        );
    }

    #[test]
    fn source_lists_default_to_everything() {
        let input: InputSpec = serde_yaml::from_str("name: infra\ntype: infrastructure\n").unwrap();
        assert_eq!(
            input.kind,
            InputKind::Infrastructure {
                infrastructure: InfrastructureInput {
                    sources: vec![InfrastructureSource::Container, InfrastructureSource::Node]
                }
            }
        );

        let input: InputSpec =
            serde_yaml::from_str("name: a\ntype: audit\naudit:\n  sources: [kubeAPI]\n").unwrap();
        assert_eq!(
            input.kind,
            InputKind::Audit {
                audit: AuditInput {
                    sources: vec![AuditSource::KubeApi]
                }
            }
        );
    }

    #[test]
    fn reserved_inputs() {
        assert!(InputSpec::reserved("application").is_some());
        assert!(InputSpec::reserved("audit").is_some());
        assert!(InputSpec::reserved("my-app").is_none());
    }
}
