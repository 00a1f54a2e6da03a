use serde_json::Value;
use tracing::warn;

use crate::logs::{TelemetryEvent, API_GATEWAY_SERVICE};

const CORRELATION_ID: &str = "x-correlation-id";
const CORRELATION_SPAN_ID: &str = "x-correlation-span-id";
const SPAN_SUFFIX: &str = "-span";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationIds {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl CorrelationIds {
    /// Derives the ids of one gateway event from its correlation headers, falling
    /// back to the request id when no `x-correlation-id` was sent.
    pub fn from_event(event: &TelemetryEvent) -> Option<Self> {
        let header = |name: &str| {
            event
                .get("request_correlation_ids")
                .and_then(|ids| ids.get(name))
                .and_then(Value::as_str)
        };

        let trace_id = header(CORRELATION_ID)
            .or_else(|| event.get_str("requestId"))?
            .to_string();

        Some(match header(CORRELATION_SPAN_ID) {
            Some(span_id) => {
                let parent_span_id = span_id
                    .strip_suffix(SPAN_SUFFIX)
                    .filter(|candidate| *candidate != trace_id)
                    .map(str::to_string);
                Self {
                    span_id: span_id.to_string(),
                    parent_span_id,
                    trace_id,
                }
            }
            None => Self {
                span_id: format!("{}{}", trace_id, SPAN_SUFFIX),
                parent_span_id: None,
                trace_id,
            },
        })
    }
}

/// Stamps `trace.*` fields onto API Gateway events; everything else passes through.
pub fn correlate(mut event: TelemetryEvent) -> TelemetryEvent {
    if event.service_name() != Some(API_GATEWAY_SERVICE) {
        return event;
    }

    let Some(ids) = CorrelationIds::from_event(&event) else {
        warn!("API Gateway event without a request id, not correlating");
        return event;
    };

    event.insert("trace.trace_id", ids.trace_id);
    event.insert("trace.span_id", ids.span_id);
    event.insert_opt("trace.parent_id", ids.parent_span_id);
    event
}
