use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::{Map, Value};

use super::config::{CodeOrTemplate, SyslogCode, SyslogConfig, SyslogRfc};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    sinks::{
        Ack, BuildError, Sink, SinkContext, SinkError, required_url,
        util::{render_template, tcp::TcpConnector, udp::UdpConnector},
    },
    templating::Template,
};

const NIL_VALUE: &str = "-";
const DEFAULT_PORT: u16 = 514;
const DEFAULT_TLS_PORT: u16 = 6514;

/// Renders records as syslog lines.
pub(super) struct SyslogEncoder {
    output: String,
    config: SyslogConfig,
}

impl SyslogEncoder {
    pub(super) fn new(output: &str, config: &SyslogConfig) -> Self {
        Self {
            output: output.to_string(),
            config: config.clone(),
        }
    }

    pub(super) fn encode(&self, record: &LogRecord) -> String {
        let doc = record.to_viaq();
        let pri = u16::from(self.code(&self.config.facility, record, "facility").code()) * 8
            + u16::from(self.code(&self.config.severity, record, "severity").code());
        let hostname = record.hostname.as_deref().unwrap_or(NIL_VALUE);
        let mut line = format!("<{pri}>");

        // Writing into a String cannot fail.
        match self.config.rfc {
            SyslogRfc::Rfc5424 => {
                let _ = write!(
                    line,
                    "1 {} {} {} {} {} - ",
                    record
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                    hostname,
                    self.field(self.config.app_name.as_ref(), record, "appName", NIL_VALUE),
                    self.field(self.config.proc_id.as_ref(), record, "procID", NIL_VALUE),
                    self.field(self.config.msg_id.as_ref(), record, "msgID", NIL_VALUE),
                );
            }
            SyslogRfc::Rfc3164 => {
                let tag = self.field(
                    self.config.app_name.as_ref(),
                    record,
                    "appName",
                    record.log_source.as_str(),
                );
                let _ = write!(
                    line,
                    "{} {} {}",
                    record.timestamp.format("%b %e %H:%M:%S"),
                    hostname,
                    tag
                );
                match self.config.proc_id.as_ref() {
                    Some(proc_id) => {
                        let proc_id = self.field(Some(proc_id), record, "procID", NIL_VALUE);
                        let _ = write!(line, "[{proc_id}]: ");
                    }
                    None => line.push_str(": "),
                }
            }
        }

        if self.config.add_log_source {
            add_log_source(record, &mut line);
        }
        line.push_str(&self.payload(&doc));
        line
    }

    fn code<T: SyslogCode + Default>(
        &self,
        code: &CodeOrTemplate<T>,
        record: &LogRecord,
        field: &str,
    ) -> T {
        match code {
            CodeOrTemplate::Static(code) => *code,
            CodeOrTemplate::Dynamic(template) => {
                render_template(template, record, &self.output, field, None)
                    .and_then(|value| T::from_name(&value))
                    .unwrap_or_default()
            }
        }
    }

    fn field(
        &self,
        template: Option<&Template>,
        record: &LogRecord,
        field: &str,
        fallback: &str,
    ) -> String {
        template
            .and_then(|template| render_template(template, record, &self.output, field, Some(fallback)))
            .map_or_else(|| fallback.to_string(), |value| value.replace(' ', "_"))
    }

    fn payload(&self, doc: &Map<String, Value>) -> String {
        let value = match &self.config.payload_key {
            Some(key) => key.get(doc),
            None => None,
        };
        match value {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => serde_json::to_string(doc).unwrap_or_default(),
        }
    }
}

fn add_log_source(record: &LogRecord, line: &mut String) {
    if let Some(meta) = &record.kubernetes {
        let _ = write!(
            line,
            "namespace_name={}, container_name={}, pod_name={}, message=",
            meta.namespace_name, meta.container_name, meta.pod_name
        );
    }
}

enum Transport {
    Udp(UdpConnector),
    /// Newline delimited frames, optionally over TLS.
    Tcp(TcpConnector),
}

pub struct SyslogSink {
    encoder: SyslogEncoder,
    transport: Transport,
}

impl SyslogSink {
    pub fn new(
        output: &OutputSpec,
        config: &SyslogConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let url = required_url(output)?;
        let invalid = |reason: &str| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: reason.to_string(),
        };
        let host = url
            .host_str()
            .ok_or_else(|| invalid("url has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let transport = match url.scheme() {
            "udp" => Transport::Udp(UdpConnector::new(
                host,
                url.port().unwrap_or(DEFAULT_PORT),
            )),
            "tcp" => Transport::Tcp(TcpConnector::new(
                host,
                url.port().unwrap_or(DEFAULT_PORT),
                None,
            )),
            "tls" => Transport::Tcp(TcpConnector::new(
                host,
                url.port().unwrap_or(DEFAULT_TLS_PORT),
                Some(cx.tls_settings(output)?),
            )),
            _ => return Err(invalid("syslog urls must use udp, tcp or tls")),
        };

        Ok(Self {
            encoder: SyslogEncoder::new(&output.name, config),
            transport,
        })
    }
}

#[async_trait]
impl Sink for SyslogSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        match &self.transport {
            Transport::Udp(connector) => {
                let frames: Vec<Vec<u8>> = batch
                    .iter()
                    .map(|record| self.encoder.encode(record).into_bytes())
                    .collect();
                connector
                    .send_all(&frames)
                    .await
                    .map_err(SinkError::transport)?;
            }
            Transport::Tcp(connector) => {
                let frames: Vec<Vec<u8>> = batch
                    .iter()
                    .map(|record| {
                        let mut frame = self.encoder.encode(record).into_bytes();
                        frame.push(b'\n');
                        frame
                    })
                    .collect();
                connector
                    .send_all(&frames)
                    .await
                    .map_err(SinkError::transport)?;
            }
        }
        Ok(Ack::accepted())
    }

    async fn healthcheck(&self) -> crate::Result<()> {
        match &self.transport {
            Transport::Udp(connector) => connector.healthcheck().await?,
            Transport::Tcp(connector) => connector.healthcheck().await?,
        }
        Ok(())
    }
}
