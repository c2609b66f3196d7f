use std::{sync::Arc, time::Instant};

use file_source::Checkpointer;
use forwarder_buffers::{BufferUsage, LimitedReceiver, LimitedSender, SendError, SendOutcome, limited};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Generation;
use crate::{
    config::DeliveryMode,
    event::{EventStatus, Finalizable, LogRecord},
    internal_events::OutputBufferClosed,
    router::{Routed, Router},
    sinks::{self, Sink, SinkContext},
    sources::{self, Source, SourceContext, kubernetes_logs::metadata::PodsFile},
    transforms::normalize::{MetadataProvider, NormalizeConfig, Normalizer},
};

/// Records in flight between the sources and the route stage.
const ROUTE_CHANNEL_SIZE: usize = 1024;

/// Everything a generation runs, built before anything of the previous generation is stopped.
pub struct Pieces {
    pub(super) generation: Arc<Generation>,
    pub(super) sources: Vec<(&'static str, Source)>,
    pub(super) shutdown: CancellationToken,
    pub(super) route: RouteStage,
    pub(super) outputs: Vec<OutputPieces>,
    pub(super) pods: Option<Arc<PodsFile>>,
}

pub(super) struct OutputPieces {
    pub(super) name: String,
    pub(super) sink: Arc<dyn Sink>,
    pub(super) receiver: LimitedReceiver<LogRecord>,
    pub(super) usage: BufferUsage,
}

/// Builds every component of `generation`. All errors are collected so a rejected configuration
/// reports them at once.
pub async fn build_pieces(
    generation: Arc<Generation>,
    checkpointer: &Arc<Checkpointer>,
) -> Result<Pieces, Vec<String>> {
    let config = &generation.config;
    let mut errors = Vec::new();

    let router = Router::new(config).map_err(|error| vec![error.to_string()])?;
    let hostname = match &config.collector.hostname {
        Some(hostname) => hostname.clone(),
        None => crate::get_hostname()
            .map_err(|error| vec![format!("Could not determine the host name: {error}")])?,
    };

    let cx = SinkContext {
        hostname: hostname.clone(),
        tls_security_profile: config.tls_security_profile.clone(),
    };
    let mut outputs = Vec::new();
    let mut handles = Vec::new();
    let mut parse_structured = false;
    for name in router.outputs() {
        let Some(spec) = config.output(name) else {
            errors.push(format!("Output {name} is not defined"));
            continue;
        };
        parse_structured |= spec.kind.wants_structured();

        let sink = match sinks::build(spec, &cx).await {
            Ok(sink) => Arc::<dyn Sink>::from(sink),
            Err(error) => {
                errors.push(format!("Output {name}: {error}"));
                continue;
            }
        };
        let usage = BufferUsage::from_span(info_span!("buffer", output = %name));
        let (sender, receiver) = limited(
            spec.tuning.buffer_limits(),
            spec.tuning.when_full(),
            usage.handle(),
        );
        handles.push(OutputHandle {
            name: name.clone(),
            sender,
            at_most_once: spec.tuning.delivery_mode == DeliveryMode::AtMostOnce,
        });
        outputs.push(OutputPieces {
            name: name.clone(),
            sink,
            receiver,
            usage,
        });
    }

    let pods = config
        .collector
        .metadata
        .pods_file
        .as_deref()
        .map(PodsFile::open);
    let normalizer = Normalizer::new(NormalizeConfig {
        hostname,
        cluster_id: config.collector.cluster_id.clone(),
        parse_structured,
        metadata: pods
            .clone()
            .map(|pods| pods as Arc<dyn MetadataProvider>),
    });

    let (out, records) = mpsc::channel(ROUTE_CHANNEL_SIZE);
    let shutdown = CancellationToken::new();
    let source_cx = SourceContext {
        checkpointer: Arc::clone(checkpointer),
        out,
        shutdown: shutdown.clone(),
        checkpoint_interval: config.collector.checkpoint_interval,
    };
    let sources = sources::build(config, &source_cx).unwrap_or_else(|error| {
        errors.push(error.to_string());
        Vec::new()
    });
    // Only the sources may hold senders, so the route stage ends once they all have.
    drop(source_cx);

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(Pieces {
        generation,
        sources,
        shutdown,
        route: RouteStage {
            records,
            normalizer,
            router,
            outputs: handles,
        },
        outputs,
        pods,
    })
}

struct OutputHandle {
    name: String,
    sender: LimitedSender<LogRecord>,
    at_most_once: bool,
}

/// The single normalize and route task between all sources and all output buffers.
pub(super) struct RouteStage {
    records: mpsc::Receiver<LogRecord>,
    normalizer: Normalizer,
    router: Router,
    outputs: Vec<OutputHandle>,
}

impl RouteStage {
    /// How often filters holding records back, such as multiline detection, are checked.
    const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

    /// Routes until every source is gone, then flushes the filters. Dropping the stage closes the
    /// output buffers, which lets the workers finish once they are empty.
    pub(super) async fn run(mut self) {
        let mut flush = tokio::time::interval(Self::FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let routed = tokio::select! {
                next = self.records.recv() => match next {
                    Some(record) => self.router.route(self.normalizer.normalize(record)),
                    None => break,
                },
                _ = flush.tick() => self.router.flush_expired(Instant::now()),
            };
            self.dispatch(routed).await;
        }
        let routed = self.router.flush();
        self.dispatch(routed).await;
        debug!(message = "Route stage finished.");
    }

    async fn dispatch(&mut self, routed: Vec<Routed>) {
        for Routed { output, mut record } in routed {
            let Some(handle) = self.outputs.get(output) else {
                record.finalize(EventStatus::Dropped);
                continue;
            };
            if handle.at_most_once {
                record.finalize(EventStatus::Delivered);
            }
            match handle.sender.send(record).await {
                Ok(SendOutcome::Queued) => {}
                Ok(SendOutcome::DroppedNewest(mut dropped)) => dropped.finalize(EventStatus::Dropped),
                Ok(SendOutcome::DroppedOldest(evicted)) => {
                    for mut dropped in evicted {
                        dropped.finalize(EventStatus::Dropped);
                    }
                }
                // The worker is gone; the record stays unacknowledged and is read again.
                Err(SendError(_record)) => emit!(OutputBufferClosed {
                    output: &handle.name
                }),
            }
        }
    }
}
