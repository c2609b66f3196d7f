//! Container logs that kubelet keeps under `/var/log/pods` on this node.
//!
//! Files are discovered by glob and tailed by the file server. Every line is decoded from the CRI
//! format, partial lines are joined, and the pod identity is taken from the file path. Pod labels
//! and ids are added later by the normalizer through [`metadata::PodsFile`].

mod cri;
pub mod metadata;
mod partial;
mod path;

use std::sync::Arc;

use file_source::{FileServerConfig, ReadEvent, paths_provider::glob::Glob};
use snafu::ResultExt;

pub use self::path::parse_log_file_path;
use self::partial::PartialMerger;
use super::{BuildError, FileProgress, InvalidPatternSnafu, SourceContext, send, spawn_file_server};
use crate::{
    config::CollectorSettings,
    event::{EventStatus, Finalizable, LogRecord, LogSource, LogType},
    internal_events::{EventsReceived, ParseError},
};

pub const SOURCE_TYPE: &str = "kubernetes_logs";

pub struct KubernetesLogs {
    paths: Glob,
    config: FileServerConfig,
    cx: SourceContext,
}

impl KubernetesLogs {
    pub fn new(settings: &CollectorSettings, cx: SourceContext) -> Result<Self, BuildError> {
        let containers = &settings.container_logs;
        for pattern in containers.include.iter().chain(&containers.exclude) {
            glob::Pattern::new(pattern).context(InvalidPatternSnafu { pattern })?;
        }
        let paths = Glob::new(&containers.include, &containers.exclude, Default::default())
            .context(InvalidPatternSnafu {
                pattern: containers.include.join(","),
            })?;

        let config = FileServerConfig {
            glob_interval: containers.glob_interval,
            checkpoint_interval: cx.checkpoint_interval,
            max_line_bytes: containers.max_line_bytes,
            read_from: containers.read_from,
            ..Default::default()
        };
        Ok(Self { paths, config, cx })
    }

    pub async fn run(self) {
        let max_line_bytes = self.config.max_line_bytes;
        let (mut lines, server) = spawn_file_server(self.paths, self.config, &self.cx);
        let mut progress = FileProgress::new(&self.cx.checkpointer);
        let mut merger = PartialMerger::new(max_line_bytes);

        while let Some(event) = lines.recv().await {
            let line = match event {
                ReadEvent::Line(line) => line,
                ReadEvent::Gap { source_id, .. } => {
                    merger.reset(&source_id);
                    continue;
                }
                ReadEvent::Closed { source_id } => {
                    merger.reset(&source_id);
                    progress.close(&source_id);
                    continue;
                }
            };

            emit!(EventsReceived {
                source_type: SOURCE_TYPE,
                count: 1,
                byte_size: line.text.len(),
            });
            let mut finalizers = progress.finalizer(&line);

            let Some(meta) = parse_log_file_path(&line.source_id) else {
                emit!(ParseError {
                    source_id: &line.source_id,
                    error: "path is not a kubelet container log path",
                    dropped: true,
                });
                finalizers.finalize(EventStatus::Dropped);
                continue;
            };

            let text = String::from_utf8_lossy(&line.text);
            let cri = match cri::parse(&text) {
                Ok(cri) => cri,
                Err(error) => {
                    emit!(ParseError {
                        source_id: &line.source_id,
                        error: &error.to_string(),
                        dropped: true,
                    });
                    finalizers.finalize(EventStatus::Dropped);
                    continue;
                }
            };

            let Some(merged) = merger.push(&line.source_id, cri, finalizers) else {
                continue;
            };
            let mut record = LogRecord::new(
                merged.message,
                LogType::Application,
                LogSource::Container,
                Arc::clone(&line.source_id),
            )
            .with_finalizers(merged.finalizers);
            record.timestamp = merged.timestamp;
            record.offset = line.offset;
            record.kubernetes = Some(meta);

            if !send(&self.cx.out, record).await {
                break;
            }
        }

        merger.clear();
        let _ = server.await;
    }
}
