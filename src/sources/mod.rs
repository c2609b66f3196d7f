//! Readers that turn node-local logs into [`LogRecord`]s.
//!
//! Every reader sends raw records, tagged with their [`LogSource`] and carrying the finalizers of
//! the lines they were built from, into the shared route stage. Normalization happens there.

pub mod audit;
pub mod journald;
pub mod kubernetes_logs;

use std::{collections::HashMap, sync::Arc, time::Duration};

use file_source::{
    Checkpointer, CheckpointsView, FileServer, FileServerConfig, Line, ReadEvent,
    paths_provider::PathsProvider,
};
use futures::future::BoxFuture;
use snafu::Snafu;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AuditSource, ForwarderConfig, InfrastructureSource, InputKind},
    event::{AckPosition, EventFinalizers, LogRecord, SourceProgress},
    internal_events::FileSourceInternalEventsEmitter,
};

/// A running reader. Completes once its shutdown token fires and its last record is sent.
pub type Source = BoxFuture<'static, ()>;

/// Lines buffered between a file server and the reader that decodes them.
const READ_CHANNEL_SIZE: usize = 1024;

/// What every reader gets from the topology.
#[derive(Clone)]
pub struct SourceContext {
    pub checkpointer: Arc<Checkpointer>,
    pub out: mpsc::Sender<LogRecord>,
    pub shutdown: CancellationToken,
    pub checkpoint_interval: Duration,
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Invalid path pattern {pattern:?}: {source}"))]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// The readers a configuration needs. Logs no pipeline refers to are not read at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub containers: bool,
    pub journal: bool,
    pub audit: Vec<AuditSource>,
}

impl SourceSet {
    pub fn for_config(config: &ForwarderConfig) -> Self {
        let mut set = Self::default();
        let referenced = config
            .pipelines
            .iter()
            .flat_map(|pipeline| pipeline.input_refs.iter())
            .filter_map(|name| config.input(name));

        for input in referenced {
            match input.kind {
                InputKind::Application { .. } => set.containers = true,
                InputKind::Infrastructure { infrastructure } => {
                    set.containers |= infrastructure
                        .sources
                        .contains(&InfrastructureSource::Container);
                    set.journal |= infrastructure.sources.contains(&InfrastructureSource::Node);
                }
                InputKind::Audit { audit } => {
                    for source in audit.sources {
                        if !set.audit.contains(&source) {
                            set.audit.push(source);
                        }
                    }
                }
            }
        }
        set.journal &= config.collector.journal.enabled;
        set
    }
}

/// Builds every reader `config` needs, named by source type.
pub fn build(
    config: &ForwarderConfig,
    cx: &SourceContext,
) -> Result<Vec<(&'static str, Source)>, BuildError> {
    let set = SourceSet::for_config(config);
    let mut sources = Vec::new();

    if set.containers {
        let source = kubernetes_logs::KubernetesLogs::new(&config.collector, cx.clone())?;
        sources.push((kubernetes_logs::SOURCE_TYPE, Box::pin(source.run()) as Source));
    }
    if set.journal {
        let source = journald::Journald::new(&config.collector.journal, cx.clone());
        sources.push((journald::SOURCE_TYPE, Box::pin(source.run()) as Source));
    }
    if !set.audit.is_empty() {
        let source = audit::AuditLogs::new(&config.collector, &set.audit, cx.clone())?;
        sources.push((audit::SOURCE_TYPE, Box::pin(source.run()) as Source));
    }
    Ok(sources)
}

/// Starts a file server on its own task and returns the lines it reads.
fn spawn_file_server<PP>(
    paths_provider: PP,
    config: FileServerConfig,
    cx: &SourceContext,
) -> (mpsc::Receiver<ReadEvent>, JoinHandle<()>)
where
    PP: PathsProvider + 'static,
{
    let (tx, rx) = mpsc::channel(READ_CHANNEL_SIZE);
    let server = FileServer {
        paths_provider,
        config,
        checkpointer: Arc::clone(&cx.checkpointer),
        emitter: FileSourceInternalEventsEmitter,
    };
    let handle = tokio::spawn(server.run(tx, cx.shutdown.clone()));
    (rx, handle)
}

/// Per-file [`SourceProgress`] of the files a reader currently follows.
struct FileProgress {
    checkpoints: Arc<CheckpointsView>,
    files: HashMap<Arc<str>, Arc<SourceProgress>>,
}

impl FileProgress {
    fn new(checkpointer: &Checkpointer) -> Self {
        Self {
            checkpoints: checkpointer.view(),
            files: HashMap::new(),
        }
    }

    fn finalizer(&mut self, line: &Line) -> EventFinalizers {
        let progress = self
            .files
            .entry(Arc::clone(&line.source_id))
            .or_insert_with(|| {
                SourceProgress::new(Arc::clone(&line.source_id), Arc::clone(&self.checkpoints))
            });
        progress.finalizer(AckPosition::File {
            fingerprint: line.fingerprint,
            offset: line.offset,
        })
    }

    /// Forgets a file. Records still in flight keep its progress alive until they complete.
    fn close(&mut self, source_id: &str) {
        self.files.remove(source_id);
    }
}

/// Sends a record unless the route stage is gone. Returns false once nothing receives anymore.
async fn send(out: &mpsc::Sender<LogRecord>, record: LogRecord) -> bool {
    out.send(record).await.is_ok()
}
