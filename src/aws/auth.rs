use std::{path::PathBuf, time::Duration};

use aws_config::{
    BehaviorVersion,
    default_provider::credentials::DefaultCredentialsChain,
    provider_config::ProviderConfig,
    sts::AssumeRoleProvider,
    web_identity_token::{StaticConfiguration, WebIdentityTokenCredentialsProvider},
};
use aws_credential_types::{Credentials, provider::SharedCredentialsProvider};
use aws_smithy_runtime_api::client::http::SharedHttpClient;
use aws_types::{SdkConfig, region::Region};
use serde::Deserialize;

use crate::config::{SecretError, SecretRef};

const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Token projected into the collector pod for STS web identity federation.
pub const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/openshift/serviceaccount/token";

const SESSION_NAME: &str = "log-forwarder";

/// How the CloudWatch output authenticates. Without a block the default AWS chain applies.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum AwsAuthentication {
    /// A fixed access key and secret pair.
    AccessKey {
        #[serde(rename = "accessKeyId")]
        access_key_id: SecretRef,
        #[serde(rename = "secretAccessKey")]
        secret_access_key: SecretRef,
    },

    /// Exchange the service account token for role credentials.
    WebIdentity {
        #[serde(rename = "roleArn")]
        role_arn: String,
        #[serde(rename = "tokenFile", default = "default_token_file")]
        token_file: PathBuf,
    },

    /// Assume a role using the default chain's credentials.
    Role {
        #[serde(rename = "assumeRole")]
        assume_role: String,
        #[serde(rename = "externalId")]
        external_id: Option<String>,
        /// Region for the STS call; defaults to the output's region.
        region: Option<String>,
    },
}

fn default_token_file() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_FILE)
}

impl AwsAuthentication {
    /// Builds the provider once per configuration generation.
    pub async fn credentials_provider(
        auth: Option<&Self>,
        service_region: Region,
        http_client: SharedHttpClient,
    ) -> Result<SharedCredentialsProvider, SecretError> {
        let provider_config = ProviderConfig::default()
            .with_region(Some(service_region.clone()))
            .with_http_client(http_client.clone());

        Ok(match auth {
            None => default_chain(service_region, &provider_config).await,
            Some(Self::AccessKey {
                access_key_id,
                secret_access_key,
            }) => SharedCredentialsProvider::new(Credentials::from_keys(
                access_key_id.resolve()?.expose(),
                secret_access_key.resolve()?.expose(),
                None,
            )),
            Some(Self::WebIdentity {
                role_arn,
                token_file,
            }) => SharedCredentialsProvider::new(
                WebIdentityTokenCredentialsProvider::builder()
                    .static_configuration(StaticConfiguration {
                        web_identity_token_file: token_file.clone(),
                        role_arn: role_arn.clone(),
                        session_name: SESSION_NAME.to_string(),
                    })
                    .configure(&provider_config)
                    .build(),
            ),
            Some(Self::Role {
                assume_role,
                external_id,
                region,
            }) => {
                let auth_region = region.clone().map_or(service_region, Region::new);
                let base = default_chain(auth_region.clone(), &provider_config).await;
                let sts_config = SdkConfig::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(auth_region.clone())
                    .http_client(http_client)
                    .build();
                let mut builder = AssumeRoleProvider::builder(assume_role)
                    .region(auth_region)
                    .session_name(SESSION_NAME)
                    .configure(&sts_config);
                if let Some(external_id) = external_id {
                    builder = builder.external_id(external_id);
                }
                SharedCredentialsProvider::new(builder.build_from_provider(base).await)
            }
        })
    }
}

async fn default_chain(region: Region, config: &ProviderConfig) -> SharedCredentialsProvider {
    SharedCredentialsProvider::new(
        DefaultCredentialsChain::builder()
            .region(region)
            .configure(config.clone())
            .load_timeout(DEFAULT_LOAD_TIMEOUT)
            .build()
            .await,
    )
}
