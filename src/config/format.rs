//! Configuration file formats. All three map onto the same document model.

use std::{fmt, path::Path};

use serde::de;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    #[default]
    Yaml,
    Toml,
    Json,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self {
            Format::Toml => "toml",
            Format::Json => "json",
            Format::Yaml => "yaml",
        };
        write!(f, "{format}")
    }
}

impl Format {
    /// Picks the format from the file extension. Extensions are matched case sensitively.
    pub fn from_path<T: AsRef<Path>>(path: T) -> Result<Self, T> {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("yaml" | "yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            _ => Err(path),
        }
    }
}

/// Parse the string represented in the specified format.
pub fn deserialize<T>(content: &str, format: Format) -> Result<T, Vec<String>>
where
    T: de::DeserializeOwned,
{
    match format {
        Format::Toml => toml::from_str(content).map_err(|e| vec![e.to_string()]),
        Format::Yaml => serde_yaml::from_str(content).map_err(|e| vec![e.to_string()]),
        Format::Json => serde_json::from_str(content).map_err(|e| vec![e.to_string()]),
    }
}
