use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use snafu::Snafu;

use super::{ForwarderConfig, Format, format, validation, vars};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid configuration: {}", errors.join("; ")))]
    Invalid { errors: Vec<String> },
}

impl ConfigError {
    pub fn errors(&self) -> Vec<String> {
        match self {
            Self::Invalid { errors } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Reads, interpolates, parses and validates the configuration at `path`.
///
/// The format is picked from the extension and defaults to YAML.
pub fn load_from_path(path: &Path) -> Result<ForwarderConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let format = Format::from_path(path).unwrap_or_default();
    load_from_str(&content, format)
}

pub fn load_from_str(content: &str, format: Format) -> Result<ForwarderConfig, ConfigError> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    let (content, warnings) =
        vars::interpolate(content, &vars).map_err(|errors| ConfigError::Invalid { errors })?;
    for warning in warnings {
        warn!(message = "Configuration interpolation warning.", %warning);
    }

    let config: ForwarderConfig =
        format::deserialize(&content, format).map_err(|errors| ConfigError::Invalid { errors })?;

    let warnings = validation::validate(&config).map_err(|errors| ConfigError::Invalid { errors })?;
    for warning in warnings {
        warn!(message = "Configuration warning.", %warning);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"
outputs:
  - name: es
    type: elasticsearch
    url: http://es.example.com:9200
pipelines:
  - name: all-apps
    inputRefs: [application]
    outputRefs: [es]
"#;

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_from_path(file.path()).unwrap();
        assert_eq!(config.outputs.len(), 1);
        assert_eq!(config.pipelines[0].input_refs, vec!["application"]);
        assert_eq!(config.data_dir, PathBuf::from(super::super::DEFAULT_DATA_DIR));
    }

    #[test]
    fn loads_toml() {
        let config = load_from_str(
            r#"
dataDir = "/tmp/forwarder"

[[outputs]]
name = "sink"
type = "http"
url = "http://collector.example.com/logs"

[[pipelines]]
name = "infra"
inputRefs = ["infrastructure"]
outputRefs = ["sink"]
"#,
            Format::Toml,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/forwarder"));
        assert_eq!(config.outputs[0].kind.type_name(), "http");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let error = load_from_path(Path::new("/nonexistent/forwarder.yaml")).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_errors_are_reported() {
        let error = load_from_str("outputs: [{name: x, type: nope}]", Format::Yaml).unwrap_err();
        assert_eq!(error.errors().len(), 1);
    }
}
