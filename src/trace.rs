use std::{
    fmt,
    marker::PhantomData,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{Event, Metadata, Subscriber, span, subscriber::Interest};
use tracing_core::{
    callsite::Identifier,
    field::{Field, Visit},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const RATE_LIMIT_SECS_FIELD: &str = "internal_log_rate_secs";

/// Installs the global subscriber.
///
/// Repeated calls are ignored, which lets tests initialize logging more than once.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let formatter = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true);
        install(filter, formatter);
    } else {
        let formatter = tracing_subscriber::fmt::layer()
            .with_ansi(color)
            .with_target(true);
        install(filter, formatter);
    }
}

fn install<L>(filter: EnvFilter, formatter: L)
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let _ = Registry::default()
        .with(RateLimitedLayer::new(formatter))
        .with(filter)
        .try_init();
}

#[cfg(test)]
pub fn test_init() {
    init(false, false, "error");
}

struct State {
    start: Instant,
    suppressed: u64,
}

/// Suppresses repeated events from one callsite.
///
/// Events carrying `internal_log_rate_secs = N` are let through once per `N` second window; every
/// other event is passed to the inner layer untouched. The first event after a window closes
/// reports how many were suppressed.
pub struct RateLimitedLayer<S, L> {
    events: DashMap<Identifier, State>,
    inner: L,
    _subscriber: PhantomData<fn(S)>,
}

impl<S, L> RateLimitedLayer<S, L>
where
    L: Layer<S>,
    S: Subscriber,
{
    pub fn new(inner: L) -> Self {
        Self {
            events: DashMap::new(),
            inner,
            _subscriber: PhantomData,
        }
    }

    fn should_emit(&self, callsite: Identifier, limit: u64) -> Option<u64> {
        let now = Instant::now();
        match self.events.entry(callsite) {
            Entry::Vacant(entry) => {
                entry.insert(State {
                    start: now,
                    suppressed: 0,
                });
                Some(0)
            }
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if now.duration_since(state.start) < Duration::from_secs(limit) {
                    state.suppressed += 1;
                    None
                } else {
                    let suppressed = state.suppressed;
                    state.start = now;
                    state.suppressed = 0;
                    Some(suppressed)
                }
            }
        }
    }
}

impl<S, L> Layer<S> for RateLimitedLayer<S, L>
where
    L: Layer<S>,
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        self.inner.register_callsite(metadata)
    }

    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        self.inner.enabled(metadata, ctx)
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_new_span(attrs, id, ctx);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.inner.on_record(id, values, ctx);
    }

    fn on_follows_from(&self, id: &span::Id, follows: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_follows_from(id, follows, ctx);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.fields().field(RATE_LIMIT_SECS_FIELD).is_none() {
            return self.inner.on_event(event, ctx);
        }

        let mut visitor = LimitVisitor::default();
        event.record(&mut visitor);
        let limit = visitor.limit.unwrap_or(0);
        if limit == 0 {
            return self.inner.on_event(event, ctx);
        }

        if let Some(suppressed) = self.should_emit(metadata.callsite(), limit) {
            if suppressed > 0 {
                emit_suppressed(metadata, suppressed);
            }
            self.inner.on_event(event, ctx);
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_enter(id, ctx);
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.inner.on_exit(id, ctx);
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.inner.on_close(id, ctx);
    }
}

fn emit_suppressed(metadata: &Metadata<'_>, suppressed: u64) {
    tracing::debug!(
        message = "Internal log was rate limited.",
        callsite = %metadata.name(),
        target = %metadata.target(),
        suppressed,
    );
}

#[derive(Default)]
struct LimitVisitor {
    limit: Option<u64>,
}

impl Visit for LimitVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == RATE_LIMIT_SECS_FIELD {
            self.limit = u64::try_from(value).ok();
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == RATE_LIMIT_SECS_FIELD {
            self.limit = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == RATE_LIMIT_SECS_FIELD {
            self.limit = format!("{value:?}").parse().ok();
        }
    }
}
