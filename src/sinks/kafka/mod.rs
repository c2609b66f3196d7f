//! Kafka producer output.

mod config;
mod sink;

pub use self::{
    config::{KafkaAuthentication, KafkaConfig, SaslConfig, SaslMechanism, codec},
    sink::KafkaSink,
};
