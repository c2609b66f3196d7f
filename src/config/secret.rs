use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum SecretError {
    #[snafu(display("Could not read secret file {}: {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Secret environment variable {name:?} is not set"))]
    MissingEnv { name: String },
    #[snafu(display("Secret from {origin} is empty"))]
    Empty { origin: String },
}

/// Owned secret text. Never printed, and overwritten with zeroes when dropped.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SensitiveString {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.fill(0);
        std::hint::black_box(&bytes);
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"<redacted secret>\"")
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted secret>")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// Where a secret comes from: inline text, a mounted file or an environment variable.
///
/// ```yaml
/// hecToken: {fromFile: /var/run/secrets/splunk/token}
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SecretRef {
    File {
        #[serde(rename = "fromFile")]
        from_file: PathBuf,
    },
    Env {
        #[serde(rename = "fromEnv")]
        from_env: String,
    },
    Inline(SensitiveString),
}

impl SecretRef {
    /// Loads the secret. Files are read on every call so a new generation sees rotated material.
    pub fn resolve(&self) -> Result<SensitiveString, SecretError> {
        let (value, origin) = match self {
            Self::Inline(value) => (value.clone(), "inline value".to_string()),
            Self::File { from_file } => (read_secret_file(from_file)?, from_file.display().to_string()),
            Self::Env { from_env } => {
                let value = std::env::var(from_env).map_err(|_| SecretError::MissingEnv {
                    name: from_env.clone(),
                })?;
                (SensitiveString(value), format!("env {from_env}"))
            }
        };
        if value.is_empty() {
            return Err(SecretError::Empty { origin });
        }
        Ok(value)
    }

    /// Resolves secrets that hold raw bytes such as PEM or PKCS#12 files.
    pub fn resolve_bytes(&self) -> Result<Vec<u8>, SecretError> {
        match self {
            Self::File { from_file } => std::fs::read(from_file).context(ReadFileSnafu {
                path: from_file.clone(),
            }),
            _ => self.resolve().map(|value| value.expose().as_bytes().to_vec()),
        }
    }
}

fn read_secret_file(path: &Path) -> Result<SensitiveString, SecretError> {
    let raw = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    Ok(SensitiveString(raw.trim_end_matches(['\r', '\n']).to_string()))
}
