pub mod compressor;
pub mod http;
pub mod tcp;
pub mod udp;

use serde::{Deserialize, Serialize};

pub use self::compressor::Compressor;
use crate::{
    event::LogRecord, internal_events::TemplateRenderingFailed, templating::Template,
};

/// Request body compression of HTTP outputs.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zlib,
    Snappy,
    Zstd,
}

impl Compression {
    pub const fn content_encoding(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
            Self::Zlib => Some("deflate"),
            Self::Snappy => Some("snappy"),
            Self::Zstd => Some("zstd"),
        }
    }

    pub const fn is_compressed(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Renders `template` against the raw document of `record`.
///
/// On failure the event is reported and `fallback` is returned, if there is one.
pub fn render_template(
    template: &Template,
    record: &LogRecord,
    output: &str,
    field: &str,
    fallback: Option<&str>,
) -> Option<String> {
    match template.render(&record.to_document()) {
        Ok(value) if !value.is_empty() => Some(value),
        Ok(_) => fallback.map(str::to_string),
        Err(error) => {
            emit!(TemplateRenderingFailed {
                output,
                field,
                error: &error,
                fallback,
            });
            fallback.map(str::to_string)
        }
    }
}
