//! Generic HTTP delivery of JSON records.

mod config;
mod sink;

pub use self::{
    config::{HttpConfig, HttpFormat, HttpMethod},
    sink::HttpSink,
};
