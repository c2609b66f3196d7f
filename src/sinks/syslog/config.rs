use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::{event::FieldPath, templating::Template};

/// Message format written to the receiver.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum SyslogRfc {
    #[serde(rename = "RFC3164")]
    Rfc3164,
    #[default]
    #[serde(rename = "RFC5424")]
    Rfc5424,
}

/// A numeric syslog code with its keyword names.
pub trait SyslogCode: Copy + Sized {
    /// Keywords by code, with optional aliases after the canonical name.
    const NAMES: &'static [&'static [&'static str]];

    fn from_code(code: u8) -> Option<Self>;

    fn code(self) -> u8;

    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Ok(code) = name.parse::<u8>() {
            return Self::from_code(code);
        }
        Self::NAMES
            .iter()
            .position(|aliases| aliases.contains(&name.as_str()))
            .and_then(|code| u8::try_from(code).ok())
            .and_then(Self::from_code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Facility(u8);

impl SyslogCode for Facility {
    const NAMES: &'static [&'static [&'static str]] = &[
        &["kern"],
        &["user"],
        &["mail"],
        &["daemon"],
        &["auth"],
        &["syslog"],
        &["lpr"],
        &["news"],
        &["uucp"],
        &["cron"],
        &["authpriv"],
        &["ftp"],
        &["ntp"],
        &["security"],
        &["console"],
        &["solaris-cron"],
        &["local0"],
        &["local1"],
        &["local2"],
        &["local3"],
        &["local4"],
        &["local5"],
        &["local6"],
        &["local7"],
    ];

    fn from_code(code: u8) -> Option<Self> {
        (usize::from(code) < Self::NAMES.len()).then_some(Self(code))
    }

    fn code(self) -> u8 {
        self.0
    }
}

impl Default for Facility {
    fn default() -> Self {
        Self(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Severity(u8);

impl SyslogCode for Severity {
    // Level names the normalizer detects map onto the closest severity.
    const NAMES: &'static [&'static [&'static str]] = &[
        &["emergency", "emerg", "panic"],
        &["alert"],
        &["critical", "crit"],
        &["error", "err"],
        &["warning", "warn"],
        &["notice"],
        &["informational", "info", "default"],
        &["debug", "trace"],
    ];

    fn from_code(code: u8) -> Option<Self> {
        (usize::from(code) < Self::NAMES.len()).then_some(Self(code))
    }

    fn code(self) -> u8 {
        self.0
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self(6)
    }
}

/// A fixed code, or a template rendered per record and looked up by name or number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeOrTemplate<T> {
    Static(T),
    Dynamic(Template),
}

impl<T: Default> Default for CodeOrTemplate<T> {
    fn default() -> Self {
        Self::Static(T::default())
    }
}

impl<'de, T: SyslogCode + fmt::Debug> Deserialize<'de> for CodeOrTemplate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(code) => T::from_code(code)
                .map(Self::Static)
                .ok_or_else(|| serde::de::Error::custom(format!("syslog code {code} is out of range"))),
            Raw::Text(text) if text.contains('{') => Template::parse(&text)
                .map(Self::Dynamic)
                .map_err(serde::de::Error::custom),
            Raw::Text(text) => T::from_name(&text)
                .map(Self::Static)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown syslog code {text:?}"))),
        }
    }
}

/// `syslog` block of an output.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyslogConfig {
    #[serde(default)]
    pub rfc: SyslogRfc,
    #[serde(default)]
    pub facility: CodeOrTemplate<Facility>,
    #[serde(default)]
    pub severity: CodeOrTemplate<Severity>,
    /// `APP-NAME` in RFC5424, the tag in RFC3164.
    pub app_name: Option<Template>,
    #[serde(rename = "procID")]
    pub proc_id: Option<Template>,
    #[serde(rename = "msgID")]
    pub msg_id: Option<Template>,
    /// Prefixes the payload with the namespace, pod and container of container records.
    #[serde(default)]
    pub add_log_source: bool,
    /// Field sent as the message instead of the whole record.
    pub payload_key: Option<FieldPath>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("local0", 16)]
    #[case("AUTHPRIV", 10)]
    #[case("23", 23)]
    fn facility_names(#[case] raw: &str, #[case] code: u8) {
        assert_eq!(Facility::from_name(raw), Some(Facility(code)));
    }

    #[rstest]
    #[case("warn", 4)]
    #[case("error", 3)]
    #[case("default", 6)]
    #[case("trace", 7)]
    #[case("0", 0)]
    fn severity_names(#[case] raw: &str, #[case] code: u8) {
        assert_eq!(Severity::from_name(raw), Some(Severity(code)));
    }

    #[test]
    fn out_of_range_codes() {
        assert_eq!(Facility::from_name("24"), None);
        assert_eq!(Severity::from_name("8"), None);
        assert_eq!(Severity::from_name("loud"), None);
    }

    #[test]
    fn parses_config() {
        let config: SyslogConfig = serde_yaml::from_str(
            r#"
rfc: RFC3164
facility: local3
severity: "{.level||\"info\"}"
appName: "{.kubernetes.container_name||\"forwarder\"}"
procID: "1234"
addLogSource: true
payloadKey: .message
"#,
        )
        .unwrap();
        assert_eq!(config.rfc, SyslogRfc::Rfc3164);
        assert_eq!(config.facility, CodeOrTemplate::Static(Facility(19)));
        assert!(matches!(config.severity, CodeOrTemplate::Dynamic(_)));
        assert!(config.add_log_source);
        assert_eq!(config.payload_key.unwrap().to_string(), ".message");

        let config: SyslogConfig = serde_yaml::from_str("facility: 2\n").unwrap();
        assert_eq!(config.rfc, SyslogRfc::Rfc5424);
        assert_eq!(config.facility, CodeOrTemplate::Static(Facility(2)));
        assert_eq!(config.severity, CodeOrTemplate::Static(Severity(6)));

        assert!(serde_yaml::from_str::<SyslogConfig>("facility: nope\n").is_err());
    }
}
