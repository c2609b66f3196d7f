use std::fmt;

use openssl::ssl::{SslContextBuilder, SslVersion};
use serde::Deserialize;
use snafu::ResultExt;

use super::{ApplyProfileSnafu, Result};

const MODERN_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
];

const INTERMEDIATE_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
];

const OLD_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
    "DHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES128-SHA256",
    "ECDHE-RSA-AES128-SHA256",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-ECDSA-AES256-SHA384",
    "ECDHE-RSA-AES256-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-AES128-SHA256",
    "DHE-RSA-AES256-SHA256",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA256",
    "AES256-SHA256",
    "AES128-SHA",
    "AES256-SHA",
    "DES-CBC3-SHA",
];

/// Cluster wide TLS policy, using OpenSSL cipher names.
///
/// ```yaml
/// tlsSecurityProfile:
///   type: Custom
///   custom:
///     minTLSVersion: VersionTLS12
///     ciphers: [ECDHE-RSA-AES128-GCM-SHA256]
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TlsSecurityProfile {
    Old,
    #[default]
    Intermediate,
    Modern,
    Custom { custom: CustomTlsProfile },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CustomTlsProfile {
    #[serde(default)]
    pub ciphers: Vec<String>,
    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: TlsVersion,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    #[serde(rename = "VersionTLS10")]
    Tls10,
    #[serde(rename = "VersionTLS11")]
    Tls11,
    #[default]
    #[serde(rename = "VersionTLS12")]
    Tls12,
    #[serde(rename = "VersionTLS13")]
    Tls13,
}

impl TlsVersion {
    const fn ssl_version(self) -> SslVersion {
        match self {
            Self::Tls10 => SslVersion::TLS1,
            Self::Tls11 => SslVersion::TLS1_1,
            Self::Tls12 => SslVersion::TLS1_2,
            Self::Tls13 => SslVersion::TLS1_3,
        }
    }
}

impl TlsSecurityProfile {
    pub fn min_version(&self) -> TlsVersion {
        match self {
            Self::Old => TlsVersion::Tls10,
            Self::Intermediate => TlsVersion::Tls12,
            Self::Modern => TlsVersion::Tls13,
            Self::Custom { custom } => custom.min_tls_version,
        }
    }

    pub fn ciphers(&self) -> Vec<&str> {
        match self {
            Self::Old => OLD_CIPHERS.to_vec(),
            Self::Intermediate => INTERMEDIATE_CIPHERS.to_vec(),
            Self::Modern => MODERN_CIPHERS.to_vec(),
            Self::Custom { custom } => custom.ciphers.iter().map(String::as_str).collect(),
        }
    }

    /// Restricts `context` to the profile's protocol versions and ciphers.
    ///
    /// TLS 1.3 suites (`TLS_*`) and TLS 1.2 cipher strings are configured separately in OpenSSL.
    pub fn apply(&self, context: &mut SslContextBuilder) -> Result<()> {
        let profile = self.to_string();
        context
            .set_min_proto_version(Some(self.min_version().ssl_version()))
            .context(ApplyProfileSnafu {
                profile: profile.clone(),
            })?;

        let (suites, ciphers): (Vec<&str>, Vec<&str>) = self
            .ciphers()
            .into_iter()
            .partition(|cipher| cipher.starts_with("TLS_"));
        if !ciphers.is_empty() {
            context
                .set_cipher_list(&ciphers.join(":"))
                .context(ApplyProfileSnafu {
                    profile: profile.clone(),
                })?;
        }
        if !suites.is_empty() {
            context
                .set_ciphersuites(&suites.join(":"))
                .context(ApplyProfileSnafu { profile })?;
        }
        Ok(())
    }
}

impl fmt::Display for TlsSecurityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Old => f.write_str("Old"),
            Self::Intermediate => f.write_str("Intermediate"),
            Self::Modern => f.write_str("Modern"),
            Self::Custom { .. } => f.write_str("Custom"),
        }
    }
}
