use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::debug;

use crate::config::{Config, HoneycombOptions};
use crate::error::Error;
use crate::logs::TelemetryEvent;
use crate::sink::EventSink;

const TEAM_HEADER: &str = "X-Honeycomb-Team";
const SAMPLE_RATE_HEADER: &str = "X-Honeycomb-Samplerate";
const EVENT_TIME_HEADER: &str = "X-Honeycomb-Event-Time";

/// Sends events one at a time to the Honeycomb events API.
pub struct HoneycombSink {
    client: reqwest::Client,
    url: String,
}

impl HoneycombSink {
    pub fn new(options: HoneycombOptions) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            TEAM_HEADER,
            HeaderValue::from_str(&options.write_key)
                .map_err(|e| Error::Initialization(format!("invalid write key - {}", e)))?,
        );
        headers.insert(SAMPLE_RATE_HEADER, HeaderValue::from(options.sample_rate));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            url: events_url(&options.api_host, &options.dataset),
        })
    }

    /// Builds the sink, letting the environment override the API host from the secret.
    pub fn from_config(config: &Config, mut options: HoneycombOptions) -> Result<Self, Error> {
        if let Some(api_host) = &config.api_host {
            options.api_host = api_host.clone();
        }
        Self::new(options)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn events_url(api_host: &str, dataset: &str) -> String {
    format!(
        "{}/1/events/{}",
        api_host.trim_end_matches('/'),
        utf8_percent_encode(dataset, NON_ALPHANUMERIC)
    )
}

#[async_trait]
impl EventSink for HoneycombSink {
    async fn send(&self, event: &TelemetryEvent) -> Result<(), Error> {
        let body = serde_json::to_vec(event).map_err(|e| Error::Send(e.to_string()))?;
        let mut request = self.client.post(&self.url).body(body);
        if let Some(timestamp) = event.get_str("timestamp") {
            request = request.header(EVENT_TIME_HEADER, timestamp);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Send(format!("{} - {}", status, body)));
        }

        debug!("Delivered event to {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_events_url() {
        assert_eq!(
            events_url("https://api.honeycomb.io/", "api-logs"),
            "https://api.honeycomb.io/1/events/api%2Dlogs"
        );
        assert_eq!(
            events_url("http://localhost:8080", "prod logs"),
            "http://localhost:8080/1/events/prod%20logs"
        );
    }

    #[test]
    fn test_api_host_override() {
        let config = Config {
            secret_id: "id".to_string(),
            api_host: Some("http://127.0.0.1:9999".to_string()),
        };
        let options = HoneycombOptions {
            write_key: "key".to_string(),
            dataset: "logs".to_string(),
            api_host: "https://api.honeycomb.io/".to_string(),
            sample_rate: 1,
        };
        let sink = HoneycombSink::from_config(&config, options).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9999/1/events/logs");
    }

    #[test]
    fn test_invalid_write_key() {
        let options = HoneycombOptions {
            write_key: "bad\nkey".to_string(),
            dataset: "logs".to_string(),
            api_host: "https://api.honeycomb.io/".to_string(),
            sample_rate: 1,
        };
        assert!(matches!(
            HoneycombSink::new(options),
            Err(Error::Initialization(_))
        ));
    }
}
