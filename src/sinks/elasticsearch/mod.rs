//! `_bulk` delivery to Elasticsearch.

mod config;
mod response;
mod sink;

pub use self::{config::ElasticsearchConfig, sink::ElasticsearchSink};
