use std::fmt;

use openssl::{
    pkey::{PKey, Private},
    ssl::{ConnectConfiguration, SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode},
    x509::{X509, store::X509StoreBuilder},
};
use serde::Deserialize;
use snafu::ResultExt;

use super::{
    LoadSecretSnafu, PrivateKeyParseSnafu, Result, TlsBuildSnafu, TlsError, TlsSecurityProfile,
    X509ParseSnafu,
};
use crate::config::SecretRef;

const PEM_START_MARKER: &str = "-----BEGIN ";

/// Per-output TLS options as written in the configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsSpec {
    /// PEM bundle of authorities to trust instead of the system roots.
    pub ca: Option<SecretRef>,
    /// Client certificate for mutual TLS, PEM.
    pub certificate: Option<SecretRef>,
    pub key: Option<SecretRef>,
    pub key_passphrase: Option<SecretRef>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Overrides the cluster wide profile for this output.
    pub security_profile: Option<TlsSecurityProfile>,
}

/// Directly usable settings for TLS connectors, loaded once per configuration generation.
#[derive(Clone)]
pub struct TlsSettings {
    verify: bool,
    authorities: Vec<X509>,
    identity: Option<Identity>,
    profile: TlsSecurityProfile,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            verify: true,
            authorities: Vec::new(),
            identity: None,
            profile: TlsSecurityProfile::default(),
        }
    }
}

#[derive(Clone)]
struct Identity {
    certificate: X509,
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl TlsSettings {
    /// Loads certificates and keys referenced by `spec`.
    ///
    /// Raw key bytes are overwritten once parsed; only the OpenSSL handles are kept.
    pub fn from_spec(spec: Option<&TlsSpec>, cluster_profile: &TlsSecurityProfile) -> Result<Self> {
        let default = TlsSpec::default();
        let spec = spec.unwrap_or(&default);

        if spec.insecure_skip_verify {
            warn!(
                "`insecureSkipVerify` is ENABLED, certificates and host names are not verified."
            );
        }

        let authorities = match &spec.ca {
            Some(ca) => load_certificates(ca, "CA bundle")?,
            None => Vec::new(),
        };

        let identity = match (&spec.certificate, &spec.key) {
            (None, None) => None,
            (Some(certificate), Some(key)) => {
                let mut certificates = load_certificates(certificate, "client certificate")?;
                let certificate = certificates.remove(0);
                let key = load_key(key, spec.key_passphrase.as_ref())?;
                Some(Identity {
                    certificate,
                    chain: certificates,
                    key,
                })
            }
            _ => return Err(TlsError::MissingCrtKeyPair),
        };

        Ok(Self {
            verify: !spec.insecure_skip_verify,
            authorities,
            identity,
            profile: spec
                .security_profile
                .clone()
                .unwrap_or_else(|| cluster_profile.clone()),
        })
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn profile(&self) -> &TlsSecurityProfile {
        &self.profile
    }

    /// A connector builder with the profile, trust store and identity applied.
    pub fn connector_builder(&self) -> Result<SslConnectorBuilder> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).context(TlsBuildSnafu)?;
        self.profile.apply(&mut builder)?;
        builder.set_verify(if self.verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        if let Some(identity) = &self.identity {
            builder
                .set_certificate(&identity.certificate)
                .context(TlsBuildSnafu)?;
            builder
                .set_private_key(&identity.key)
                .context(TlsBuildSnafu)?;
            for certificate in &identity.chain {
                builder
                    .add_extra_chain_cert(certificate.clone())
                    .context(TlsBuildSnafu)?;
            }
        }

        if !self.authorities.is_empty() {
            let mut store = X509StoreBuilder::new().context(TlsBuildSnafu)?;
            for authority in &self.authorities {
                store.add_cert(authority.clone()).context(TlsBuildSnafu)?;
            }
            builder
                .set_verify_cert_store(store.build())
                .context(TlsBuildSnafu)?;
        }

        Ok(builder)
    }

    pub fn apply_connect_configuration(&self, connection: &mut ConnectConfiguration) {
        connection.set_verify_hostname(self.verify);
        if !self.verify {
            connection.set_verify(SslVerifyMode::NONE);
        }
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("verify", &self.verify)
            .field("authorities", &self.authorities.len())
            .field("identity", &self.identity.is_some())
            .field("profile", &self.profile)
            .finish()
    }
}

fn load_certificates(secret: &SecretRef, note: &'static str) -> Result<Vec<X509>> {
    let data = secret.resolve_bytes().context(LoadSecretSnafu { note })?;
    let certificates = if data
        .windows(PEM_START_MARKER.len())
        .any(|window| window == PEM_START_MARKER.as_bytes())
    {
        X509::stack_from_pem(&data).context(X509ParseSnafu { note })?
    } else {
        vec![X509::from_der(&data).context(X509ParseSnafu { note })?]
    };
    if certificates.is_empty() {
        return Err(TlsError::NoCertificate { note });
    }
    Ok(certificates)
}

fn load_key(secret: &SecretRef, passphrase: Option<&SecretRef>) -> Result<PKey<Private>> {
    let mut data = secret
        .resolve_bytes()
        .context(LoadSecretSnafu { note: "private key" })?;
    let passphrase = passphrase
        .map(|passphrase| passphrase.resolve())
        .transpose()
        .context(LoadSecretSnafu {
            note: "key passphrase",
        })?;

    let key = match &passphrase {
        None => PKey::private_key_from_pem(&data).or_else(|_| PKey::private_key_from_der(&data)),
        Some(phrase) => {
            PKey::private_key_from_pem_passphrase(&data, phrase.expose().as_bytes()).or_else(
                |_| PKey::private_key_from_pkcs8_passphrase(&data, phrase.expose().as_bytes()),
            )
        }
    };
    data.fill(0);
    key.context(PrivateKeyParseSnafu)
}
