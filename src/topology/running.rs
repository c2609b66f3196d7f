use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use file_source::Checkpointer;
use futures::{Future, FutureExt, future::join_all};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    Generation,
    builder::{self, Pieces},
};
use crate::{
    config::ForwarderConfig,
    delivery::{self, OutputWorker},
    internal_events::FileCheckpointWriteError,
    status::StatusReporter,
};

/// How long tasks get to unwind after their outputs were aborted.
const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The new generation is running.
    Reloaded { generation: u64 },
    /// The configuration was rejected and the previous generation keeps running.
    Rejected { errors: Vec<String> },
}

/// The tasks of the active generation.
struct RunningGeneration {
    /// Stops the sources, and with them the route stage.
    shutdown: CancellationToken,
    sources: Vec<JoinHandle<()>>,
    route: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    /// Makes workers give up on what they still hold.
    abort: CancellationToken,
    reporters: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl RunningGeneration {
    /// Stops reading and waits for the outputs to deliver what was read, up to the drain timeout.
    async fn drain(self) {
        self.shutdown.cancel();
        let RunningGeneration {
            sources,
            route,
            workers,
            abort,
            reporters,
            drain_timeout,
            ..
        } = self;

        let mut tasks = sources;
        tasks.push(route);
        tasks.extend(workers);

        let mut pending = join_all(tasks);
        if timeout(drain_timeout, &mut pending).await.is_err() {
            warn!(
                message = "Outputs did not drain in time; remaining records are read again after restart.",
                timeout_secs = drain_timeout.as_secs(),
            );
            abort.cancel();
            if timeout(ABORT_GRACE, &mut pending).await.is_err() {
                error!(message = "Tasks did not stop after abort.");
            }
        }
        for reporter in reporters {
            reporter.abort();
        }
    }
}

/// Runs one generation at a time and swaps generations on reload.
pub struct RunningTopology {
    active: ArcSwap<Generation>,
    checkpointer: Arc<Checkpointer>,
    status: Arc<StatusReporter>,
    running: Option<RunningGeneration>,
    abort_tx: mpsc::UnboundedSender<()>,
}

impl RunningTopology {
    /// Builds and starts the first generation.
    ///
    /// The returned receiver yields when a component panicked and the process should shut down.
    pub async fn start(
        config: ForwarderConfig,
        status: Arc<StatusReporter>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<()>), Vec<String>> {
        if let Err(error) = std::fs::create_dir_all(&config.data_dir) {
            let errors = vec![format!(
                "Could not create data directory {}: {error}",
                config.data_dir.display()
            )];
            status.config_rejected(&errors);
            return Err(errors);
        }
        let checkpointer = Arc::new(Checkpointer::new(&config.data_dir));
        checkpointer.read_checkpoints().await;

        let generation = Arc::new(Generation::new(1, config));
        let pieces = match builder::build_pieces(Arc::clone(&generation), &checkpointer).await {
            Ok(pieces) => pieces,
            Err(errors) => {
                status.config_rejected(&errors);
                return Err(errors);
            }
        };

        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let mut topology = Self {
            active: ArcSwap::new(generation),
            checkpointer,
            status,
            running: None,
            abort_tx,
        };
        topology.spawn(pieces);
        Ok((topology, abort_rx))
    }

    /// The configuration generation currently running.
    pub fn generation(&self) -> Arc<Generation> {
        self.active.load_full()
    }

    pub fn status(&self) -> &Arc<StatusReporter> {
        &self.status
    }

    /// Replaces the running generation with one built from `config`.
    ///
    /// The new generation is built first; if that fails nothing is stopped. Otherwise the old
    /// generation is drained, its checkpoints written, and the new one started from them.
    pub async fn reload(&mut self, config: ForwarderConfig) -> ReloadOutcome {
        let current = self.generation();
        if config.data_dir != current.config.data_dir {
            warn!(
                message = "Changing the data directory requires a restart; keeping the current one.",
                current = %current.config.data_dir.display(),
                requested = %config.data_dir.display(),
            );
        }

        let generation = Arc::new(current.next(config));
        let pieces = match builder::build_pieces(Arc::clone(&generation), &self.checkpointer).await {
            Ok(pieces) => pieces,
            Err(errors) => {
                self.status.config_rejected(&errors);
                return ReloadOutcome::Rejected { errors };
            }
        };

        info!(message = "Draining previous generation.", generation = current.id);
        if let Some(running) = self.running.take() {
            running.drain().await;
        }
        self.write_checkpoints().await;

        self.active.store(generation);
        self.spawn(pieces);
        ReloadOutcome::Reloaded {
            generation: self.generation().id,
        }
    }

    /// Drains the running generation and persists the final checkpoints.
    pub async fn stop(mut self) {
        if let Some(running) = self.running.take() {
            running.drain().await;
        }
        self.write_checkpoints().await;
    }

    async fn write_checkpoints(&self) {
        match self.checkpointer.write_checkpoints().await {
            Ok(count) => debug!(message = "Checkpoints written.", count),
            Err(error) => emit!(FileCheckpointWriteError { error: &error }),
        }
    }

    fn spawn(&mut self, pieces: Pieces) {
        let Pieces {
            generation,
            sources,
            shutdown,
            route,
            outputs,
            pods,
        } = pieces;
        let config = &generation.config;
        self.status.generation_started(
            generation.id,
            outputs.iter().map(|output| output.name.as_str()),
        );

        let abort = CancellationToken::new();
        let mut workers = Vec::with_capacity(outputs.len());
        let mut reporters = Vec::with_capacity(outputs.len());
        for output in outputs {
            let Some(spec) = config.output(&output.name) else {
                continue;
            };
            reporters.push(output.usage.install(&output.name));

            let sink = Arc::clone(&output.sink);
            let status = Arc::clone(&self.status);
            let name = output.name.clone();
            tokio::spawn(
                async move { delivery::healthcheck(&name, &*sink, &status).await; }
                    .in_current_span(),
            );

            let worker = OutputWorker::new(spec, output.sink, Arc::clone(&self.status));
            workers.push(self.spawn_task(
                format!("output/{}", output.name),
                worker.run(output.receiver, abort.clone()),
            ));
        }

        let route = self.spawn_task("route".to_owned(), route.run());
        let sources = sources
            .into_iter()
            .map(|(name, source)| self.spawn_task(format!("source/{name}"), source))
            .collect();
        if let Some(pods) = pods {
            tokio::spawn(pods.watch(config.collector.metadata.refresh_interval, shutdown.clone()));
        }

        info!(
            message = "Generation started.",
            generation = generation.id,
            pipelines = config.pipelines.len(),
            outputs = workers.len(),
        );
        self.running = Some(RunningGeneration {
            shutdown,
            sources,
            route,
            workers,
            abort,
            reporters,
            drain_timeout: config.collector.drain_timeout,
        });
    }

    /// Spawns a component task. A panic shuts the process down instead of silently stopping the
    /// component.
    fn spawn_task(
        &self,
        name: String,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> JoinHandle<()> {
        let abort_tx = self.abort_tx.clone();
        let span = info_span!("component", id = %name);
        tokio::spawn(
            async move {
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    error!(message = "Component panicked; shutting down.", component = %name);
                    _ = abort_tx.send(());
                }
            }
            .instrument(span),
        )
    }
}
