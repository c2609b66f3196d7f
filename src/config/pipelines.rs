use serde::Deserialize;

/// Connects inputs to outputs through an ordered chain of filters.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineSpec {
    pub name: String,
    pub input_refs: Vec<String>,
    pub output_refs: Vec<String>,
    #[serde(default)]
    pub filter_refs: Vec<String>,
    /// Shorthand for a `parse` filter at the head of the chain.
    pub parse: Option<ParseKind>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParseKind {
    Json,
}
