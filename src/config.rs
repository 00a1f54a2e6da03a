use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use serde::Deserialize;
use std::env;
use std::string::String;
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_API_HOST: &str = "https://api.honeycomb.io/";

pub struct Config {
    /// Secrets Manager id (name or ARN) of the secret holding the Honeycomb options.
    pub secret_id: String,
    /// Overrides the `apiHost` stored in the secret.
    pub api_host: Option<String>,
}

impl Config {
    pub fn load_from_env() -> Result<Config, Error> {
        let conf = Config {
            secret_id: env::var("SECRET_ID")
                .map_err(|e| Error::Config(format!("SECRET_ID not set - {}", e)))?,
            api_host: env::var("HONEYCOMB_API_HOST")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        if conf.secret_id.trim().is_empty() {
            return Err(Error::Config("SECRET_ID is empty".to_string()));
        }

        Ok(conf)
    }
}

/// Honeycomb client options, stored as JSON in the secret.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoneycombOptions {
    pub write_key: String,
    pub dataset: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}

fn default_sample_rate() -> u32 {
    1
}

impl HoneycombOptions {
    pub fn from_secret_string(secret_id: &str, secret: Option<&str>) -> Result<Self, Error> {
        serde_json::from_str(secret.unwrap_or("{}")).map_err(|e| {
            Error::Initialization(format!(
                "secret {} is not a valid Honeycomb configuration - {}",
                secret_id, e
            ))
        })
    }
}

/// Where the Honeycomb options come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, secret_id: &str) -> Result<HoneycombOptions, Error>;
}

pub struct SecretsManagerSource {
    client: SecretsManagerClient,
}

impl SecretsManagerSource {
    pub fn new(aws_config: &SdkConfig) -> Self {
        Self::from_client(SecretsManagerClient::new(aws_config))
    }

    pub fn from_client(client: SecretsManagerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for SecretsManagerSource {
    async fn fetch(&self, secret_id: &str) -> Result<HoneycombOptions, Error> {
        debug!(
            "Initializing Honeycomb.IO client with configuration from {}",
            secret_id
        );

        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|error| {
                Error::Initialization(format!(
                    "failed to access AWS Secrets Manager, make sure the lambda function has permissions to read the {} secret - {}",
                    secret_id,
                    error.into_service_error()
                ))
            })?;

        HoneycombOptions::from_secret_string(secret_id, response.secret_string())
    }
}
