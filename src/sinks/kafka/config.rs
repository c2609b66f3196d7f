use rdkafka::ClientConfig;
use serde::Deserialize;
use url::Url;

use crate::{
    config::{OutputSpec, SecretRef},
    sinks::{BuildError, util::Compression},
    templating::{Template, TemplateParseError},
    tls::TlsSecurityProfile,
};

pub const DEFAULT_TOPIC: &str = "topic";

const DEFAULT_PORT: u16 = 9092;

/// `kafka` block of an output.
///
/// Brokers come from `brokers` or, when that is empty, from the output url. The topic comes from
/// `topic` or the url path.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KafkaConfig {
    pub topic: Option<Template>,
    #[serde(default)]
    pub brokers: Vec<Url>,
    pub authentication: Option<KafkaAuthentication>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaAuthentication {
    pub sasl: Option<SaslConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaslConfig {
    pub username: SecretRef,
    pub password: SecretRef,
    #[serde(default)]
    pub mechanism: SaslMechanism,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum SaslMechanism {
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// The Kafka codec for an output compression, if Kafka has one.
pub const fn codec(compression: Compression) -> Option<&'static str> {
    match compression {
        Compression::None => Some("none"),
        Compression::Gzip => Some("gzip"),
        Compression::Snappy => Some("snappy"),
        Compression::Zstd => Some("zstd"),
        Compression::Zlib => None,
    }
}

impl KafkaConfig {
    /// The configured topic, or the one named by the url path.
    pub fn topic(&self, url: Option<&Url>) -> Result<Template, TemplateParseError> {
        if let Some(topic) = &self.topic {
            return Ok(topic.clone());
        }
        let from_path = url
            .map(|url| url.path().trim_matches('/'))
            .filter(|path| !path.is_empty())
            .unwrap_or(DEFAULT_TOPIC);
        Template::parse(from_path)
    }

    fn servers<'a>(&'a self, url: Option<&'a Url>) -> Vec<&'a Url> {
        if self.brokers.is_empty() {
            url.into_iter().collect()
        } else {
            self.brokers.iter().collect()
        }
    }

    /// Producer settings for `output`, with TLS material and SASL credentials loaded.
    pub fn to_rdkafka(
        &self,
        output: &OutputSpec,
        cluster_profile: &TlsSecurityProfile,
    ) -> Result<ClientConfig, BuildError> {
        let invalid = |reason: String| BuildError::InvalidSettings {
            output: output.name.clone(),
            reason,
        };
        let servers = self.servers(output.url.as_ref());
        if servers.is_empty() {
            return Err(BuildError::MissingUrl {
                output: output.name.clone(),
            });
        }
        let bootstrap = servers
            .iter()
            .map(|url| {
                url.host_str()
                    .map(|host| format!("{host}:{}", url.port().unwrap_or(DEFAULT_PORT)))
                    .ok_or_else(|| invalid(format!("broker {url} has no host")))
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(",");
        let compression = codec(output.tuning.compression)
            .ok_or_else(|| invalid("kafka does not support zlib compression".into()))?;
        let timeout_ms = output.tuning.request_timeout.as_millis().to_string();

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &bootstrap)
            .set("compression.codec", compression)
            .set("socket.timeout.ms", &timeout_ms)
            .set("message.timeout.ms", &timeout_ms);

        let secure = output.tls.is_some() || servers.iter().any(|url| url.scheme() == "tls");
        let sasl = self
            .authentication
            .as_ref()
            .and_then(|auth| auth.sasl.as_ref());
        let protocol = match (secure, sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        };
        client_config.set("security.protocol", protocol);

        if let Some(sasl) = sasl {
            let secret = |secret: &SecretRef| {
                secret
                    .resolve()
                    .map_err(|source| BuildError::Secret { source })
            };
            client_config
                .set("sasl.mechanisms", sasl.mechanism.as_str())
                .set("sasl.username", secret(&sasl.username)?.expose())
                .set("sasl.password", secret(&sasl.password)?.expose());
        }

        if secure {
            self.set_tls(&mut client_config, output, cluster_profile)?;
        }
        Ok(client_config)
    }

    /// librdkafka takes PEM text directly, so the TLS secrets are passed through unparsed.
    fn set_tls(
        &self,
        client_config: &mut ClientConfig,
        output: &OutputSpec,
        cluster_profile: &TlsSecurityProfile,
    ) -> Result<(), BuildError> {
        let pem = |secret: &SecretRef| {
            secret
                .resolve()
                .map_err(|source| BuildError::Secret { source })
        };
        let profile = output
            .tls
            .as_ref()
            .and_then(|tls| tls.security_profile.as_ref())
            .unwrap_or(cluster_profile);
        let ciphers: Vec<&str> = profile
            .ciphers()
            .into_iter()
            .filter(|cipher| !cipher.starts_with("TLS_"))
            .collect();
        if !ciphers.is_empty() {
            client_config.set("ssl.cipher.suites", ciphers.join(":"));
        }

        let Some(tls) = &output.tls else {
            return Ok(());
        };
        if let Some(ca) = &tls.ca {
            client_config.set("ssl.ca.pem", pem(ca)?.expose());
        }
        if let Some(certificate) = &tls.certificate {
            client_config.set("ssl.certificate.pem", pem(certificate)?.expose());
        }
        if let Some(key) = &tls.key {
            client_config.set("ssl.key.pem", pem(key)?.expose());
        }
        if let Some(passphrase) = &tls.key_passphrase {
            client_config.set("ssl.key.password", pem(passphrase)?.expose());
        }
        if tls.insecure_skip_verify {
            client_config
                .set("enable.ssl.certificate.verification", "false")
                .set("ssl.endpoint.identification.algorithm", "none");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputKind;

    fn parse(yaml: &str) -> (OutputSpec, KafkaConfig) {
        let output: OutputSpec = serde_yaml::from_str(yaml).unwrap();
        let OutputKind::Kafka { kafka } = &output.kind else {
            unreachable!()
        };
        let kafka = kafka.clone();
        (output, kafka)
    }

    fn client_config(yaml: &str) -> ClientConfig {
        let (output, kafka) = parse(yaml);
        kafka
            .to_rdkafka(&output, &TlsSecurityProfile::default())
            .unwrap()
    }

    #[test]
    fn topic_comes_from_the_url_path() {
        let (output, kafka) = parse("name: k\ntype: kafka\nurl: tls://kafka.svc:9093/clo-topic\n");
        assert_eq!(kafka.topic(output.url.as_ref()).unwrap().get_ref(), "clo-topic");

        let (output, kafka) = parse("name: k\ntype: kafka\nurl: tcp://kafka.svc:9092\n");
        assert_eq!(kafka.topic(output.url.as_ref()).unwrap().get_ref(), DEFAULT_TOPIC);

        let (output, kafka) = parse(
            "name: k\ntype: kafka\nurl: tcp://kafka.svc:9092/ignored\nkafka:\n  topic: 'topic-logging-{.log_type}'\n",
        );
        assert!(kafka.topic(output.url.as_ref()).unwrap().is_dynamic());
    }

    #[test]
    fn plaintext_url() {
        let config = client_config("name: k\ntype: kafka\nurl: tcp://kafka.svc/clo-topic\n");
        assert_eq!(config.get("bootstrap.servers"), Some("kafka.svc:9092"));
        assert_eq!(config.get("security.protocol"), Some("plaintext"));
        assert_eq!(config.get("compression.codec"), Some("none"));
        assert_eq!(config.get("message.timeout.ms"), Some("60000"));
        assert!(config.get("ssl.cipher.suites").is_none());
    }

    #[test]
    fn brokers_win_over_the_url() {
        let config = client_config(
            "name: k\ntype: kafka\nurl: tls://ignored:9093/t\nkafka:\n  brokers:\n    - tls://a.ns1.svc:9092\n    - tls://b.ns2.svc:9093\n",
        );
        assert_eq!(
            config.get("bootstrap.servers"),
            Some("a.ns1.svc:9092,b.ns2.svc:9093")
        );
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert!(
            config
                .get("ssl.cipher.suites")
                .is_some_and(|ciphers| ciphers.contains("ECDHE"))
        );
    }

    #[test]
    fn sasl_over_tls() {
        let config = client_config(
            "name: k\ntype: kafka\nurl: tls://amq.svc:9093/logging-topic\ntls:\n  ca: CA-PEM\n  insecureSkipVerify: true\nkafka:\n  authentication:\n    sasl:\n      username: admin\n      password: s3cret\n      mechanism: SCRAM-SHA-512\ntuning:\n  compression: zstd\n",
        );
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanisms"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("sasl.username"), Some("admin"));
        assert_eq!(config.get("sasl.password"), Some("s3cret"));
        assert_eq!(config.get("ssl.ca.pem"), Some("CA-PEM"));
        assert_eq!(
            config.get("enable.ssl.certificate.verification"),
            Some("false")
        );
        assert_eq!(config.get("compression.codec"), Some("zstd"));
    }

    #[test]
    fn zlib_is_refused() {
        let (output, kafka) =
            parse("name: k\ntype: kafka\nurl: tcp://kafka.svc\ntuning:\n  compression: zlib\n");
        assert!(matches!(
            kafka.to_rdkafka(&output, &TlsSecurityProfile::default()),
            Err(BuildError::InvalidSettings { .. })
        ));
    }
}
