//! Field templates such as `app-{.kubernetes.namespace_name||.log_type||"unknown"}`.
//!
//! Text outside braces is copied verbatim. Inside braces, `||` separates alternatives that are
//! tried in order; the first field that is present and non-empty, or the first literal, wins.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

use crate::event::{FieldPath, PathParseError};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TemplateParseError {
    #[snafu(display("unclosed '{{' in template {template:?}"))]
    UnclosedBrace { template: String },
    #[snafu(display("empty expression in template {template:?}"))]
    EmptyExpression { template: String },
    #[snafu(display("unterminated string literal in template {template:?}"))]
    UnterminatedLiteral { template: String },
    #[snafu(display("invalid field in template {template:?}: {source}"))]
    InvalidField {
        template: String,
        source: PathParseError,
    },
}

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum TemplateRenderingError {
    #[snafu(display("none of the fields {fields:?} are present"))]
    MissingFields { fields: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    Field(FieldPath),
    Literal(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Alternatives tried in order.
    FirstNonEmpty(Vec<Term>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    src: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(src: &str) -> Result<Self, TemplateParseError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = src;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = find_closing(after).ok_or_else(|| {
                if has_open_quote(after) {
                    TemplateParseError::UnterminatedLiteral {
                        template: src.to_string(),
                    }
                } else {
                    TemplateParseError::UnclosedBrace {
                        template: src.to_string(),
                    }
                }
            })?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::FirstNonEmpty(parse_expression(
                src,
                &after[..close],
            )?));
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            src: src.to_string(),
            segments,
        })
    }

    /// A template that renders `path` alone.
    pub fn from_field(path: FieldPath) -> Self {
        Self {
            src: format!("{{{path}}}"),
            segments: vec![Segment::FirstNonEmpty(vec![Term::Field(path)])],
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::FirstNonEmpty(_)))
    }

    pub fn get_fields(&self) -> Vec<&FieldPath> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::FirstNonEmpty(terms) => Some(terms),
                Segment::Literal(_) => None,
            })
            .flatten()
            .filter_map(|term| match term {
                Term::Field(path) => Some(path),
                Term::Literal(_) => None,
            })
            .collect()
    }

    pub fn render(&self, doc: &Map<String, Value>) -> Result<String, TemplateRenderingError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::FirstNonEmpty(terms) => {
                    let value = terms
                        .iter()
                        .find_map(|term| match term {
                            Term::Literal(text) if !text.is_empty() => Some(text.clone()),
                            Term::Literal(_) => None,
                            Term::Field(path) => {
                                path.get_string(doc).filter(|value| !value.is_empty())
                            }
                        })
                        .ok_or_else(|| TemplateRenderingError::MissingFields {
                            fields: terms
                                .iter()
                                .filter_map(|term| match term {
                                    Term::Field(path) => Some(path.to_string()),
                                    Term::Literal(_) => None,
                                })
                                .collect(),
                        })?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }

    pub fn get_ref(&self) -> &str {
        &self.src
    }
}

fn find_closing(expr: &str) -> Option<usize> {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in expr.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '}' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

fn has_open_quote(expr: &str) -> bool {
    expr.chars().filter(|c| *c == '"').count() % 2 == 1
}

fn parse_expression(template: &str, expr: &str) -> Result<Vec<Term>, TemplateParseError> {
    let mut terms = Vec::new();
    for raw in split_alternatives(expr) {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TemplateParseError::EmptyExpression {
                template: template.to_string(),
            });
        }
        if let Some(inner) = raw.strip_prefix('"') {
            let Some(inner) = inner.strip_suffix('"') else {
                return Err(TemplateParseError::UnterminatedLiteral {
                    template: template.to_string(),
                });
            };
            terms.push(Term::Literal(inner.replace("\\\"", "\"")));
        } else {
            terms.push(Term::Field(FieldPath::parse(raw).context(
                InvalidFieldSnafu {
                    template: template.to_string(),
                },
            )?));
        }
    }
    Ok(terms)
}

/// Splits on `||` outside string literals.
fn split_alternatives(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if escaped {
            escaped = false;
        } else if c == b'\\' && in_quote {
            escaped = true;
        } else if c == b'"' {
            in_quote = !in_quote;
        } else if !in_quote && c == b'|' && bytes.get(i + 1) == Some(&b'|') {
            parts.push(&expr[start..i]);
            i += 2;
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}

impl FromStr for Template {
    type Err = TemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Template {
    type Error = TemplateParseError;

    fn try_from(src: &str) -> Result<Self, Self::Error> {
        Self::parse(src)
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.src)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn group_name_prefers_namespace_uid() {
        let template =
            Template::parse(r#"prefix-{.kubernetes.namespace_id||.log_type||"none-typed-logs"}"#)
                .unwrap();

        let with_uid = doc(json!({
            "log_type": "application",
            "kubernetes": {"namespace_id": "6d2c3a"},
        }));
        assert_eq!(template.render(&with_uid).unwrap(), "prefix-6d2c3a");

        let without_uid = doc(json!({"log_type": "infrastructure"}));
        assert_eq!(template.render(&without_uid).unwrap(), "prefix-infrastructure");

        assert_eq!(template.render(&Map::new()).unwrap(), "prefix-none-typed-logs");
    }

    #[test]
    fn empty_values_fall_through() {
        let template = Template::parse(r#"{.a||.b}"#).unwrap();
        assert_eq!(template.render(&doc(json!({"a": "", "b": 3}))).unwrap(), "3");
    }

    #[test]
    fn missing_fields_fail() {
        let template = Template::parse("{.kubernetes.container_name}").unwrap();
        assert_eq!(
            template.render(&Map::new()),
            Err(TemplateRenderingError::MissingFields {
                fields: vec![".kubernetes.container_name".to_string()]
            })
        );
    }

    #[test]
    fn static_template() {
        let template = Template::parse("app-write").unwrap();
        assert!(!template.is_dynamic());
        assert_eq!(template.render(&Map::new()).unwrap(), "app-write");
    }

    #[test]
    fn literal_with_braces() {
        let template = Template::parse(r#"{.missing||"a}b"}-x"#).unwrap();
        assert_eq!(template.render(&Map::new()).unwrap(), "a}b-x");
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Template::parse("app-{.log_type"),
            Err(TemplateParseError::UnclosedBrace { .. })
        ));
        assert!(matches!(
            Template::parse("{}"),
            Err(TemplateParseError::EmptyExpression { .. })
        ));
        assert!(matches!(
            Template::parse(r#"{"open}"#),
            Err(TemplateParseError::UnterminatedLiteral { .. })
        ));
    }
}
