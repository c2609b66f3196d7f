use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PathParseError {
    #[snafu(display("field path is empty"))]
    Empty,
    #[snafu(display("unterminated quote in field path {path:?}"))]
    UnterminatedQuote { path: String },
    #[snafu(display("empty segment in field path {path:?}"))]
    EmptySegment { path: String },
}

/// A path into a log document such as `.kubernetes.labels."app.kubernetes.io/name"`.
///
/// The leading dot is optional. Segments containing dots or slashes are quoted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathParseError> {
        let trimmed = path.trim();
        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(PathParseError::Empty);
        }

        let mut segments = Vec::new();
        let mut chars = body.chars().peekable();
        loop {
            let mut segment = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                segment.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        c => segment.push(c),
                    }
                }
                if !closed {
                    return Err(PathParseError::UnterminatedQuote {
                        path: path.to_string(),
                    });
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    segment.push(c);
                    chars.next();
                }
            }

            if segment.is_empty() {
                return Err(PathParseError::EmptySegment {
                    path: path.to_string(),
                });
            }
            segments.push(segment);

            match chars.next() {
                Some('.') => continue,
                None => break,
                Some(_) => {
                    return Err(PathParseError::EmptySegment {
                        path: path.to_string(),
                    });
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    /// Whether `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }

    pub fn get<'a>(&self, doc: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        rest.iter()
            .try_fold(doc.get(first)?, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Looks the path up and renders scalars as text. Objects, arrays and null count as absent.
    pub fn get_string(&self, doc: &Map<String, Value>) -> Option<String> {
        match self.get(doc)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn remove(&self, doc: &mut Map<String, Value>) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = doc;
        for segment in parents {
            current = match current.get_mut(segment)? {
                Value::Object(map) => map,
                _ => return None,
            };
        }
        current.remove(last)
    }

    /// Inserts `value`, creating intermediate objects as needed.
    pub fn insert(&self, doc: &mut Map<String, Value>, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };
        let mut current = doc;
        for segment in parents {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert(last.clone(), value);
    }

    /// Label-safe rendering: segments joined with `_`, dots and slashes replaced.
    pub fn to_label_name(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.replace(['.', '/', '-'], "_"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            if segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '@')
            {
                write!(f, ".{segment}")?;
            } else {
                write!(f, ".\"{}\"", segment.replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Keeps only the values at `paths`, dropping everything else.
pub fn retain_paths(doc: &Map<String, Value>, paths: &[FieldPath]) -> Map<String, Value> {
    let mut kept = Map::new();
    for path in paths {
        if let Some(value) = path.get(doc) {
            path.insert(&mut kept, value.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(".kubernetes.namespace_name", &["kubernetes", "namespace_name"])]
    #[case("kubernetes.pod_name", &["kubernetes", "pod_name"])]
    #[case(r#".kubernetes.labels."app.kubernetes.io/name""#, &["kubernetes", "labels", "app.kubernetes.io/name"])]
    #[case(r#"."@timestamp""#, &["@timestamp"])]
    fn parses_paths(#[case] raw: &str, #[case] expected: &[&str]) {
        let path = FieldPath::parse(raw).unwrap();
        assert_eq!(path.segments(), expected);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case(".a..b")]
    #[case(r#".a."b"#)]
    fn rejects_malformed_paths(#[case] raw: &str) {
        assert!(FieldPath::parse(raw).is_err());
    }

    #[test]
    fn get_insert_remove() {
        let mut doc = json!({"kubernetes": {"labels": {"app.kubernetes.io/name": "web"}}})
            .as_object()
            .cloned()
            .unwrap();
        let path = FieldPath::parse(r#".kubernetes.labels."app.kubernetes.io/name""#).unwrap();
        assert_eq!(path.get_string(&doc).as_deref(), Some("web"));

        let new = FieldPath::parse(".openshift.labels.env").unwrap();
        new.insert(&mut doc, json!("prod"));
        assert_eq!(new.get_string(&doc).as_deref(), Some("prod"));

        assert_eq!(path.remove(&mut doc), Some(json!("web")));
        assert_eq!(path.get(&doc), None);
    }

    #[test]
    fn retains_listed_paths() {
        let doc = json!({"message": "m", "log_type": "application", "hostname": "h", "kubernetes": {"pod_name": "p", "namespace_name": "n"}})
            .as_object()
            .cloned()
            .unwrap();
        let kept = retain_paths(
            &doc,
            &[
                FieldPath::parse(".message").unwrap(),
                FieldPath::parse(".kubernetes.pod_name").unwrap(),
            ],
        );
        assert_eq!(
            Value::Object(kept),
            json!({"message": "m", "kubernetes": {"pod_name": "p"}})
        );
    }

    #[test]
    fn display_round_trips() {
        let raw = r#".kubernetes.labels."app.kubernetes.io/name""#;
        assert_eq!(FieldPath::parse(raw).unwrap().to_string(), raw);
    }
}
