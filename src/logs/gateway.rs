//! API Gateway execution logs.
//!
//! API Gateway writes one CloudWatch line per execution step, each prefixed with
//! the request id:
//!
//! ```text
//! (8b3c1f2e-...) HTTP Method: GET, Resource Path: /orders
//! (8b3c1f2e-...) Method request headers: {Host=api.example.com, User-Agent=curl/8.4.0}
//! (8b3c1f2e-...) Method completed with status: 200
//! ```
//!
//! The lines of one request are folded into an [`ExecutionRecord`], which is then
//! turned into at most one [`TelemetryEvent`] by [`parse`].

use chrono::{DateTime, SecondsFormat};
use fancy_regex::Regex;
use itertools::Itertools;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

use crate::logs::{LogGroupRecord, TelemetryEvent, API_GATEWAY_SERVICE};

const THROTTLE_ERROR_MESSAGE: &str = "Request throttled because the API Gateway stage is over capacity. Increase the ThrottlingBurstLimit and ThrottlingRateLimit in your Stage method settings";
const DEBUG_LOG_HEADER: &str = "Debug-Log-Enabled";
const CORRELATION_HEADER_PREFIX: &str = "x-correlation-";

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\((?<id>[^)\s]+)\) (?<body>.*)$").expect("Failed to create regex")
});

static HTTP_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^HTTP Method: (?<method>[A-Z]+), Resource Path: (?<path>\S+)")
        .expect("Failed to create regex")
});

static INTEGRATION_LATENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Received response\..*Integration latency: (?<latency>\d+) ms")
        .expect("Failed to create regex")
});

static METHOD_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Method completed with status: (?<status>\d+)").expect("Failed to create regex")
});

static CUSTOMER_FUNCTION_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)^Lambda execution failed with status \d+ due to customer function error: (?<error>.*?)(?:\. Lambda request id: \S+)?\s*$",
    )
    .expect("Failed to create regex")
});

static THROTTLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Key|Method) throttle limit exceeded").expect("Failed to create regex")
});

static THROTTLE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Limit: (?<limit>\d+(?:\.\d+)?)").expect("Failed to create regex"));

static THROTTLE_BURST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Burst: (?<burst>\d+)").expect("Failed to create regex"));

// header values may themselves contain "," so only split before the next `Name=`,
// where Name is an HTTP token (no `/` or `;` as in `application/xml;q=0.9`)
static HEADER_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r",\s*(?=[A-Za-z0-9!#$%&'*+.^_`|~-]+=)").expect("Failed to create regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct KeyThrottle {
    pub detail: String,
    pub limit: Option<f64>,
    pub burst: Option<u64>,
}

/// Everything API Gateway logged about one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRecord {
    pub request_id: String,
    pub api_stage: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
    pub http_method: Option<String>,
    pub http_resource_path: Option<String>,
    pub method_request_headers: Option<HashMap<String, String>>,
    pub endpoint_response_headers: Option<HashMap<String, String>>,
    pub method_response_headers: Option<HashMap<String, String>>,
    pub integration_latency: Option<u64>,
    pub method_status: Option<u16>,
    pub execution_failure: Option<String>,
    pub customer_function_error: Option<String>,
    pub key_throttle: Option<KeyThrottle>,
}

impl ExecutionRecord {
    fn new(request_id: &str, api_stage: Option<String>, timestamp: i64) -> Self {
        Self {
            request_id: request_id.to_string(),
            api_stage,
            started_at: timestamp,
            finished_at: timestamp,
            ..Default::default()
        }
    }

    /// `@timestamp`: the `Starting execution` line, else the first line, RFC 3339.
    pub fn timestamp(&self) -> Option<String> {
        DateTime::from_timestamp_millis(self.started_at)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// `request-execution-duration`, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.finished_at - self.started_at
    }

    fn apply(&mut self, body: &str, timestamp: i64) {
        self.finished_at = self.finished_at.max(timestamp);

        if body.starts_with("Starting execution for request") {
            self.started_at = timestamp;
        } else if let Some(captures) = captures(&HTTP_METHOD, body) {
            self.http_method = captures.get("method").cloned();
            self.http_resource_path = captures.get("path").cloned();
        } else if let Some(headers) = body.strip_prefix("Method request headers: ") {
            self.method_request_headers = Some(parse_header_map(headers));
        } else if let Some(headers) = body.strip_prefix("Endpoint response headers: ") {
            self.endpoint_response_headers = Some(parse_header_map(headers));
        } else if let Some(headers) = body.strip_prefix("Method response headers: ") {
            self.method_response_headers = Some(parse_header_map(headers));
        } else if let Some(captures) = captures(&INTEGRATION_LATENCY, body) {
            self.integration_latency = captures.get("latency").and_then(|v| v.parse().ok());
        } else if let Some(captures) = captures(&METHOD_STATUS, body) {
            self.method_status = captures.get("status").and_then(|v| v.parse().ok());
        } else if let Some(captures) = captures(&CUSTOMER_FUNCTION_ERROR, body) {
            self.customer_function_error = captures.get("error").cloned();
        } else if body.starts_with("Execution failed due to ") {
            self.execution_failure = Some(body.trim_end().to_string());
        } else if matches!(THROTTLE.is_match(body), Ok(true)) {
            self.key_throttle = Some(KeyThrottle {
                detail: body.trim_end().to_string(),
                limit: captures(&THROTTLE_LIMIT, body)
                    .and_then(|c| c.get("limit").and_then(|v| v.parse().ok())),
                burst: captures(&THROTTLE_BURST, body)
                    .and_then(|c| c.get("burst").and_then(|v| v.parse().ok())),
            });
        }
    }
}

fn captures(re: &Regex, text: &str) -> Option<HashMap<String, String>> {
    let captures = re.captures(text).ok().flatten()?;
    Some(
        re.capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect(),
    )
}

/// Parses API Gateway's `{Name=value, Other=value}` rendering of a header map.
pub fn parse_header_map(raw: &str) -> HashMap<String, String> {
    let inner = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim();
    if inner.is_empty() {
        return HashMap::new();
    }

    let mut pairs: Vec<&str> = Vec::new();
    let mut next_pair_start: usize = 0;
    for m in HEADER_SEPARATOR.find_iter(inner).flatten() {
        let Range { start, end } = m.range();
        pairs.push(&inner[next_pair_start..start]);
        next_pair_start = end;
    }
    pairs.push(&inner[next_pair_start..]);

    pairs
        .into_iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Folds the lines of an execution log group into one record per request, in
/// the order requests first appear.
pub fn group_execution_logs(record: &LogGroupRecord) -> Vec<ExecutionRecord> {
    let api_stage = record
        .log_group
        .rsplit_once('/')
        .map(|(_, stage)| stage.to_string());

    let mut records: Vec<ExecutionRecord> = Vec::new();
    let mut by_request: HashMap<String, usize> = HashMap::new();

    for entry in &record.log_events {
        let Some(line) = captures(&REQUEST_LINE, &entry.message) else {
            debug!("skipping API Gateway line without request id: {}", entry.message);
            continue;
        };
        let (Some(request_id), Some(body)) = (line.get("id"), line.get("body")) else {
            continue;
        };

        let index = *by_request.entry(request_id.clone()).or_insert_with(|| {
            records.push(ExecutionRecord::new(
                request_id,
                api_stage.clone(),
                entry.timestamp,
            ));
            records.len() - 1
        });
        records[index].apply(body, entry.timestamp);
    }

    records
}

/// Applies the inclusion policy to one request and builds its event.
///
/// Throttled requests are always reported. Otherwise only errors (status >= 400)
/// and requests that answered with `Debug-Log-Enabled: true` produce an event.
pub fn parse(record: &ExecutionRecord) -> Option<TelemetryEvent> {
    debug!(
        "Generating an event for request {:?} - {}",
        record.api_stage, record.request_id
    );

    if let Some(throttle) = &record.key_throttle {
        return Some(throttle_event(record, throttle));
    }

    let (Some(endpoint_response_headers), Some(method_request_headers)) = (
        &record.endpoint_response_headers,
        &record.method_request_headers,
    ) else {
        debug!(
            "Unable to generate an event because either endpoint_response_headers or method_request_headers are missing"
        );
        return None;
    };

    let empty = HashMap::new();
    let method_response_headers = record.method_response_headers.as_ref().unwrap_or(&empty);

    let debug_enabled = method_response_headers
        .get(DEBUG_LOG_HEADER)
        .is_some_and(|v| v == "true");
    let is_error = record.method_status.is_some_and(|status| status >= 400);

    if !debug_enabled && !is_error {
        debug!(
            "Not generating an event because DEBUG level logging isn't enabled by the request headers {} flag",
            DEBUG_LOG_HEADER
        );
        return None;
    }

    let mut event = TelemetryEvent::new();
    event.insert("service_name", API_GATEWAY_SERVICE);
    event.insert("level", if is_error { "ERROR" } else { "TRACE" });
    event.insert_opt("api_stage", record.api_stage.clone());
    event.insert("duration_ms", record.duration_ms());
    event.insert_opt("timestamp", record.timestamp());
    event.insert_opt("status_code", record.method_status);
    event.insert_opt("http_method", record.http_method.clone());
    event.insert_opt("http_resource_path", record.http_resource_path.clone());
    event.insert_opt("integration_latency", record.integration_latency);
    event.insert_opt("execution_failure", record.execution_failure.clone());
    event.insert("request_correlation_ids", correlation_ids(method_response_headers));

    let header = |headers: &HashMap<String, String>, name: &str| headers.get(name).cloned();
    event.insert_opt("requestId", header(endpoint_response_headers, "x-amzn-RequestId"));
    event.insert_opt("remote_ip", header(method_request_headers, "X-Forwarded-For"));
    event.insert_opt("country", header(method_request_headers, "CloudFront-Viewer-Country"));
    event.insert_opt("user_agent", header(method_request_headers, "User-Agent"));
    event.insert_opt("host", header(method_request_headers, "Host"));
    event.insert_opt("accept", header(method_request_headers, "Accept"));
    event.insert_opt("content_type", header(endpoint_response_headers, "Content-Type"));
    event.insert_opt("content_length", header(endpoint_response_headers, "Content-Length"));
    event.insert_opt("version", header(endpoint_response_headers, "X-Amz-Executed-Version"));

    if let Some(error) = &record.customer_function_error {
        event.insert("errorMessage", error.as_str());
        event.insert("errorName", "LambdaInvocationError");
    }

    if let (Some(method), Some(path)) = (&record.http_method, &record.http_resource_path) {
        event.insert("name", format!("{} {}", method, path));
    }

    Some(event)
}

fn throttle_event(record: &ExecutionRecord, throttle: &KeyThrottle) -> TelemetryEvent {
    let mut event = TelemetryEvent::new();
    event.insert("service_name", API_GATEWAY_SERVICE);
    event.insert("request_id", record.request_id.as_str());
    event.insert("requestId", record.request_id.as_str());
    event.insert_opt("api_stage", record.api_stage.clone());
    event.insert("level", "ERROR");
    event.insert("errorMessage", THROTTLE_ERROR_MESSAGE);
    event.insert("errorName", "APIGateway-KeyThrottle");
    event.insert("name", "KeyThrottle");
    event.insert("duration_ms", record.duration_ms());
    event.insert_opt("timestamp", record.timestamp());
    event.insert_opt("status_code", record.method_status);
    event.insert("request_correlation_ids", Map::new());
    event.insert("throttle_detail", throttle.detail.as_str());
    event.insert_opt("throttle_limit", throttle.limit);
    event.insert_opt("throttle_burst", throttle.burst);
    event
}

// when several spellings of one header are present, the lowercase one wins,
// otherwise the first in sorted order
fn correlation_ids(method_response_headers: &HashMap<String, String>) -> Map<String, Value> {
    let mut ids = Map::new();
    for (name, value) in method_response_headers.iter().sorted() {
        let key = name.to_lowercase();
        if !key.starts_with(CORRELATION_HEADER_PREFIX) {
            continue;
        }
        if *name == key || !ids.contains_key(&key) {
            ids.insert(key, Value::from(value.as_str()));
        }
    }
    ids
}

/// Groups and parses an API Gateway execution log group.
pub fn parse_logs(record: &LogGroupRecord) -> Vec<TelemetryEvent> {
    let executions = group_execution_logs(record);
    debug!(
        "Parsed {} API Gateway executions from {}",
        executions.len(),
        record.log_group
    );

    executions
        .iter()
        .filter_map(|execution| {
            let event = parse(execution)?;
            debug!("Sending API Gateway trace event: {:?}", event);
            Some(event)
        })
        .collect()
}
