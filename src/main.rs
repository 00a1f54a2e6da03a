use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use ship_logs_to_honey::config::{Config, SecretsManagerSource};
use ship_logs_to_honey::Shipper;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    ship_logs_to_honey::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = Config::load_from_env()?;

    // the Honeycomb client itself is created on the first invocation and reused afterwards
    let shipper = Shipper::new(config, Arc::new(SecretsManagerSource::new(&aws_config)));

    run(service_fn(|request: LambdaEvent<Value>| {
        ship_logs_to_honey::handler(&shipper, request)
    }))
    .await
}
