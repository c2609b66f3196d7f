use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::{
    ClientConfig,
    error::KafkaError,
    producer::{FutureProducer, FutureRecord, Producer},
    types::RDKafkaErrorCode,
    util::Timeout,
};

use super::config::KafkaConfig;
use crate::{
    config::OutputSpec,
    event::LogRecord,
    sinks::{
        Ack, BuildError, HEALTHCHECK_TIMEOUT, Sink, SinkContext, SinkError, util::render_template,
    },
    templating::Template,
};

/// What a failed delivery means for the record.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Retry,
    Rejected,
    Auth,
}

fn classify(error: &KafkaError) -> Failure {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::InvalidMessage,
        ) => Failure::Rejected,
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::Authentication,
        ) => Failure::Auth,
        _ => Failure::Retry,
    }
}

pub struct KafkaSink {
    output: String,
    producer: FutureProducer,
    topic: Template,
}

impl KafkaSink {
    pub fn new(output: &OutputSpec, config: &KafkaConfig, cx: &SinkContext) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidSettings {
            output: output.name.clone(),
            reason,
        };
        let topic = config
            .topic(output.url.as_ref())
            .map_err(|error| invalid(format!("invalid topic: {error}")))?;
        let client_config: ClientConfig =
            config.to_rdkafka(output, &cx.tls_security_profile)?;
        let producer = client_config
            .create()
            .map_err(|error: KafkaError| invalid(format!("creating kafka producer failed: {error}")))?;
        Ok(Self {
            output: output.name.clone(),
            producer,
            topic,
        })
    }

    async fn produce(&self, topic: &str, record: &LogRecord) -> Result<(), KafkaError> {
        let payload = serde_json::to_vec(&record.to_viaq())
            .map_err(|_| KafkaError::MessageProduction(RDKafkaErrorCode::InvalidMessage))?;
        let message = FutureRecord::<(), [u8]>::to(topic)
            .payload(&payload[..])
            .timestamp(record.timestamp.timestamp_millis());
        // Delivery is bounded by `message.timeout.ms`.
        self.producer
            .send(message, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(error, _)| error)
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let mut ack = Ack::accepted();
        let topics: Vec<Option<String>> = batch
            .iter()
            .map(|record| render_template(&self.topic, record, &self.output, "topic", None))
            .collect();
        let mut deliveries = Vec::with_capacity(batch.len());
        let mut indices = Vec::with_capacity(batch.len());
        for (index, (record, topic)) in batch.iter().zip(&topics).enumerate() {
            match topic {
                Some(topic) => {
                    indices.push(index);
                    deliveries.push(self.produce(topic, record));
                }
                None => {
                    ack.rejected.push(index);
                    ack.reason.get_or_insert_with(|| "topic could not be rendered".into());
                }
            }
        }

        for (index, result) in indices.into_iter().zip(join_all(deliveries).await) {
            let Err(error) = result else {
                continue;
            };
            match classify(&error) {
                Failure::Auth => return Err(SinkError::auth(error)),
                Failure::Rejected => {
                    ack.rejected.push(index);
                    ack.reason.get_or_insert_with(|| error.to_string());
                }
                Failure::Retry => {
                    debug!(message = "Kafka delivery failed.", output = %self.output, %error);
                    ack.retry.push(index);
                }
            }
        }
        ack.rejected.sort_unstable();
        Ok(ack)
    }

    /// Fetches cluster metadata, for the topic too when it does not depend on the record.
    async fn healthcheck(&self) -> crate::Result<()> {
        let producer = self.producer.clone();
        let topic = (!self.topic.is_dynamic()).then(|| self.topic.get_ref().to_string());
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(topic.as_deref(), HEALTHCHECK_TIMEOUT)
                .map(|_| ())
        })
        .await??;
        Ok(())
    }
}
