use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::error::Error;
use crate::logs::TelemetryEvent;

/// Destination for finished events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &TelemetryEvent) -> Result<(), Error>;
}

pub type DynEventSink = Arc<dyn EventSink>;

/// Process-wide sink handle, created on first use and reused by later invocations.
///
/// Concurrent first callers share one in-flight initialisation. A failed
/// initialisation is not stored, so the next caller tries again.
#[derive(Default)]
pub struct LazySink {
    sink: OnceCell<DynEventSink>,
}

impl LazySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: DynEventSink) -> Self {
        Self {
            sink: OnceCell::new_with(Some(sink)),
        }
    }

    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<DynEventSink, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DynEventSink, Error>>,
    {
        self.sink.get_or_try_init(init).await.cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.sink.initialized()
    }
}

/// Outcome of one fan-out. Returned to the Lambda runtime as the invocation result.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub attempted: usize,
    pub failed: usize,
    pub decode_failures: usize,
}

/// Sends every event concurrently and waits for all of them. A failed send is
/// logged and counted; it never stops the other sends.
pub async fn dispatch(events: Vec<TelemetryEvent>, sink: &dyn EventSink) -> BatchResult {
    let attempted = events.len();
    if attempted == 0 {
        info!("No events to send");
        return BatchResult::default();
    }

    let start_time = Instant::now();
    let results = join_all(events.iter().map(|event| async move {
        sink.send(event)
            .await
            .inspect_err(|error| error!(%error, ?event, "failed to send event to Honeycomb"))
    }))
    .await;

    let failed = results.iter().filter(|result| result.is_err()).count();
    info!(
        "Delivered {} of {} events to Honeycomb in {}ms.",
        attempted - failed,
        attempted,
        start_time.elapsed().as_millis()
    );

    BatchResult {
        attempted,
        failed,
        decode_failures: 0,
    }
}
