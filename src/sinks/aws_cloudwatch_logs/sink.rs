use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::{
    Client,
    error::ProvideErrorMetadata,
    operation::{
        create_log_group::CreateLogGroupError, create_log_stream::CreateLogStreamError,
        put_log_events::PutLogEventsError,
    },
    types::InputLogEvent,
};
use aws_smithy_runtime_api::client::{orchestrator::HttpResponse, result::SdkError};

use super::{CloudwatchKey, config::CloudwatchConfig};
use crate::{
    aws::{self, ErrorClass},
    config::OutputSpec,
    event::{LogRecord, LogSource, LogType},
    sinks::{Ack, BuildError, Sink, SinkContext, SinkError, util::render_template},
    templating::Template,
};

/// Largest `PutLogEvents` payload accepted by the service.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Largest number of events in one `PutLogEvents` call.
const MAX_EVENTS: usize = 10_000;

/// Bytes the service adds to every event when computing the payload size.
const EVENT_OVERHEAD: usize = 26;

pub struct CloudwatchSink {
    output: String,
    client: Client,
    group_name: Option<Template>,
    create_missing: bool,
}

impl CloudwatchSink {
    pub async fn new(
        output: &OutputSpec,
        config: &CloudwatchConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let tls = cx.tls_settings(output)?;
        let client = aws::cloudwatch_client(
            &config.region,
            output.url.as_ref().map(url::Url::as_str),
            config.authentication.as_ref(),
            &tls,
            output.tuning.request_timeout,
        )
        .await
        .map_err(|source| BuildError::Aws { source })?;
        Ok(Self {
            output: output.name.clone(),
            client,
            group_name: config.group_name.clone(),
            create_missing: config.create_missing,
        })
    }

    fn key(&self, record: &LogRecord) -> CloudwatchKey {
        let group = self
            .group_name
            .as_ref()
            .and_then(|template| {
                render_template(
                    template,
                    record,
                    &self.output,
                    "groupName",
                    Some(record.log_type.as_str()),
                )
            })
            .unwrap_or_else(|| record.log_type.as_str().to_string());
        CloudwatchKey {
            group,
            stream: stream_name(record),
        }
    }

    async fn put(&self, key: &CloudwatchKey, events: Vec<InputLogEvent>) -> Result<(), SinkError> {
        let result = self.put_once(key, events.clone()).await;
        match result {
            Err(error) if self.create_missing && is_resource_not_found(&error) => {
                debug!(
                    message = "Creating log group and stream.",
                    group = %key.group,
                    stream = %key.stream,
                );
                self.create_destination(key).await?;
                self.put_once(key, events)
                    .await
                    .map_err(|error| sdk_error(&error))
            }
            result => result.map_err(|error| sdk_error(&error)),
        }
    }

    async fn put_once(
        &self,
        key: &CloudwatchKey,
        events: Vec<InputLogEvent>,
    ) -> Result<(), SdkError<PutLogEventsError, HttpResponse>> {
        let output = self
            .client
            .put_log_events()
            .log_group_name(&key.group)
            .log_stream_name(&key.stream)
            .set_log_events(Some(events))
            .send()
            .await?;
        if let Some(rejected) = output.rejected_log_events_info() {
            warn!(
                message = "Some events were rejected.",
                output = %self.output,
                too_new_start = ?rejected.too_new_log_event_start_index(),
                too_old_end = ?rejected.too_old_log_event_end_index(),
                expired_end = ?rejected.expired_log_event_end_index(),
            );
        }
        Ok(())
    }

    async fn create_destination(&self, key: &CloudwatchKey) -> Result<(), SinkError> {
        match self
            .client
            .create_log_group()
            .log_group_name(&key.group)
            .send()
            .await
        {
            Ok(_) => {}
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(CreateLogGroupError::is_resource_already_exists_exception) => {}
            Err(error) => return Err(sdk_error(&error)),
        }
        match self
            .client
            .create_log_stream()
            .log_group_name(&key.group)
            .log_stream_name(&key.stream)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(CreateLogStreamError::is_resource_already_exists_exception) =>
            {
                Ok(())
            }
            Err(error) => Err(sdk_error(&error)),
        }
    }
}

#[async_trait]
impl Sink for CloudwatchSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let mut partitions: BTreeMap<CloudwatchKey, Vec<(usize, &LogRecord)>> = BTreeMap::new();
        for (index, record) in batch.iter().enumerate() {
            partitions
                .entry(self.key(record))
                .or_default()
                .push((index, record));
        }

        let mut ack = Ack::accepted();
        for (key, mut records) in partitions {
            // Events of one call have to be in chronological order.
            records.sort_by_key(|(_, record)| record.timestamp);
            let mut encoded = Vec::with_capacity(records.len());
            for (index, record) in records {
                encoded.push((index, encode_event(record)?));
            }
            for chunk in chunks(encoded) {
                let (indices, events): (Vec<usize>, Vec<InputLogEvent>) = chunk.into_iter().unzip();
                match self.put(&key, events).await {
                    Ok(()) => {}
                    Err(SinkError::Transport { message }) => {
                        debug!(
                            message = "Put failed for stream.",
                            group = %key.group,
                            stream = %key.stream,
                            error = %message,
                        );
                        ack.retry.extend(indices);
                    }
                    Err(SinkError::Rejected { reason }) => {
                        ack.rejected.extend(indices);
                        ack.reason.get_or_insert(reason);
                    }
                    Err(error @ SinkError::Auth { .. }) => return Err(error),
                }
            }
        }
        ack.retry.sort_unstable();
        ack.rejected.sort_unstable();
        Ok(ack)
    }

    async fn healthcheck(&self) -> crate::Result<()> {
        self.client
            .describe_log_groups()
            .limit(1)
            .send()
            .await
            .map(drop)
            .map_err(|error| sdk_error(&error).into())
    }

    fn max_batch_bytes(&self) -> Option<usize> {
        Some(MAX_PAYLOAD_BYTES)
    }
}

/// Stream of a record inside its group.
///
/// Container logs get one stream per container, node journal logs one per host and audit logs one
/// per host and audit source. Infrastructure container streams carry the host name so the same
/// daemonset pod on different nodes does not share a stream.
pub fn stream_name(record: &LogRecord) -> String {
    let host = record.hostname.as_deref().unwrap_or("unknown");
    match (record.log_source, &record.kubernetes) {
        (LogSource::Container, Some(meta)) => {
            let container = format!(
                "{}_{}_{}",
                meta.namespace_name, meta.pod_name, meta.container_name
            );
            if record.log_type == LogType::Infrastructure {
                format!("{host}.{container}")
            } else {
                container
            }
        }
        (LogSource::Node, _) => format!("{host}.journal.system"),
        (source, _) => format!("{host}.{source}"),
    }
}

fn encode_event(record: &LogRecord) -> Result<InputLogEvent, SinkError> {
    let message = serde_json::to_string(&record.to_viaq()).map_err(SinkError::rejected)?;
    InputLogEvent::builder()
        .timestamp(record.timestamp.timestamp_millis())
        .message(message)
        .build()
        .map_err(SinkError::rejected)
}

/// Service-side size of an encoded event.
fn event_size(event: &InputLogEvent) -> usize {
    event.message().len() + EVENT_OVERHEAD
}

/// Splits encoded events so no call exceeds the service's count and size limits.
///
/// An event larger than the payload limit on its own still gets a chunk, and the service rejects
/// it.
fn chunks(events: Vec<(usize, InputLogEvent)>) -> Vec<Vec<(usize, InputLogEvent)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut bytes = 0;
    for (index, event) in events {
        let size = event_size(&event);
        if !current.is_empty() && (current.len() >= MAX_EVENTS || bytes + size > MAX_PAYLOAD_BYTES)
        {
            out.push(std::mem::take(&mut current));
            bytes = 0;
        }
        bytes += size;
        current.push((index, event));
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn is_resource_not_found(error: &SdkError<PutLogEventsError, HttpResponse>) -> bool {
    error
        .as_service_error()
        .is_some_and(PutLogEventsError::is_resource_not_found_exception)
}

fn sdk_error<E: ProvideErrorMetadata>(error: &SdkError<E, HttpResponse>) -> SinkError {
    let code = error.code();
    let message = format!(
        "{}: {}",
        code.unwrap_or("unknown"),
        error.message().unwrap_or("no message")
    );
    match aws::classify(error, code) {
        ErrorClass::Retriable => SinkError::transport(message),
        ErrorClass::Auth => SinkError::auth(message),
        ErrorClass::Permanent => SinkError::rejected(message),
    }
}
