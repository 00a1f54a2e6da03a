use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CredentialSource};
use crate::events::RawBatch;
use crate::honeycomb::HoneycombSink;
use crate::sink::{BatchResult, DynEventSink, LazySink};

pub mod config;
pub mod error;
pub mod events;
pub mod honeycomb;
pub mod logs;
pub mod sink;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

/// State kept across invocations: configuration, the credential source and the
/// lazily created sink.
pub struct Shipper {
    config: Config,
    credentials: Arc<dyn CredentialSource>,
    sink: LazySink,
}

impl Shipper {
    pub fn new(config: Config, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            credentials,
            sink: LazySink::new(),
        }
    }

    /// Builds a shipper around an existing sink, skipping credential lookup.
    pub fn with_sink(
        config: Config,
        credentials: Arc<dyn CredentialSource>,
        sink: DynEventSink,
    ) -> Self {
        Self {
            config,
            credentials,
            sink: LazySink::with_sink(sink),
        }
    }

    pub async fn sink(&self) -> Result<DynEventSink, error::Error> {
        self.sink
            .get_or_try_init(|| async {
                let options = self.credentials.fetch(&self.config.secret_id).await?;
                let sink = HoneycombSink::from_config(&self.config, options)?;
                info!("Honeycomb client initialized, sending to {}", sink.url());
                Ok(Arc::new(sink) as DynEventSink)
            })
            .await
    }
}

// lambda handler
pub async fn handler(shipper: &Shipper, evt: LambdaEvent<Value>) -> Result<BatchResult, Error> {
    info!("Handling lambda invocation");
    debug!("received invocation event: {:?}", evt.payload);

    let batch = RawBatch::try_from(evt.payload)?;
    let sink = shipper.sink().await?;

    let decoded = logs::decode::decode(batch)?;
    let mut events = logs::process::extract_events(decoded.records);
    events.extend(decoded.direct_events);

    let result = sink::dispatch(events, sink.as_ref()).await;
    Ok(BatchResult {
        decode_failures: decoded.decode_failures,
        ..result
    })
}
