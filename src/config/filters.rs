use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};

use crate::event::FieldPath;

#[derive(Clone, Debug, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FilterKind,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterKind {
    /// Adds static labels under `openshift.labels`.
    OpenshiftLabels {
        #[serde(rename = "openshiftLabels")]
        labels: BTreeMap<String, String>,
    },
    /// Joins multi-line stack traces from one container stream into a single record.
    DetectMultilineException,
    /// Parses the message body as a JSON object into `structured`.
    Parse,
    Drop { drop: Vec<DropTest> },
    Prune { prune: PruneSpec },
}

/// A record is dropped when every condition of any one test holds.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropTest {
    pub test: Vec<DropCondition>,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DropCondition {
    pub field: FieldPath,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub matches: Option<Regex>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub not_matches: Option<Regex>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PruneSpec {
    /// Fields to remove.
    #[serde(rename = "in")]
    pub remove: Option<Vec<FieldPath>>,
    /// Fields to keep; everything else is removed.
    #[serde(rename = "notIn")]
    pub keep: Option<Vec<FieldPath>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filters() {
        let filters: Vec<FilterSpec> = serde_yaml::from_str(
            r#"
- name: labels
  type: openshiftLabels
  openshiftLabels:
    env: prod
- name: stack
  type: detectMultilineException
- name: json
  type: parse
- name: no-debug
  type: drop
  drop:
    - test:
        - field: .level
          matches: "debug|trace"
        - field: .kubernetes.namespace_name
          notMatches: "^prod-"
- name: slim
  type: prune
  prune:
    in: [.kubernetes.annotations, .kubernetes.container_id]
    notIn: [.message, .log_type, .log_source, "@timestamp", .kubernetes]
"#,
        )
        .unwrap();

        assert_eq!(filters.len(), 5);
        assert!(matches!(&filters[0].kind, FilterKind::OpenshiftLabels { labels } if labels["env"] == "prod"));
        assert!(matches!(filters[1].kind, FilterKind::DetectMultilineException));
        assert!(matches!(filters[2].kind, FilterKind::Parse));

        let FilterKind::Drop { drop } = &filters[3].kind else {
            panic!("expected a drop filter");
        };
        let conditions = &drop[0].test;
        assert!(conditions[0].matches.as_ref().unwrap().is_match("debug"));
        assert!(conditions[1].not_matches.is_some());

        let FilterKind::Prune { prune } = &filters[4].kind else {
            panic!("expected a prune filter");
        };
        assert_eq!(prune.remove.as_ref().unwrap().len(), 2);
        assert_eq!(prune.keep.as_ref().unwrap()[3].to_string(), ".@timestamp");
    }

    #[test]
    fn rejects_bad_regex() {
        let result: Result<FilterSpec, _> = serde_yaml::from_str(
            "name: d\ntype: drop\ndrop:\n  - test:\n      - field: .level\n        matches: \"(\"\n",
        );
        assert!(result.is_err());
    }
}
