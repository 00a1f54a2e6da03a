use chrono::{DateTime, SecondsFormat};
use fancy_regex::Regex;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::logs::{LogEntry, TelemetryEvent};

static LEVEL_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:INFO|DEBUG|WARN|ERROR|TRACE|FATAL)\s+").expect("Failed to create regex")
});

/// Turns one Lambda log line carrying a JSON payload into an event.
///
/// Lines whose payload is not a JSON object are dropped.
pub fn parse(entry: &LogEntry) -> Option<TelemetryEvent> {
    debug!("Parsing lambda log event {:?}", entry);

    let (request_id, timestamp, raw_event) = match &entry.extracted_fields {
        Some(fields) => (
            fields.get("request_id").cloned(),
            fields.get("timestamp").cloned(),
            fields.get("event").map(String::as_str).unwrap_or_default(),
        ),
        None => (
            None,
            DateTime::from_timestamp_millis(entry.timestamp)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            entry.message.as_str(),
        ),
    };

    let data = match parse_event_json(raw_event) {
        Ok(data) => data,
        Err(error) => {
            debug!(%error, "dropping lambda log line");
            return None;
        }
    };

    let mut event = TelemetryEvent::from(data);
    event.insert_opt("requestId", request_id);
    event.insert_opt("timestamp", timestamp);
    Some(event)
}

fn parse_event_json(raw_event: &str) -> Result<Map<String, Value>, Error> {
    let payload = match LEVEL_MARKER
        .find(raw_event)
        .map_err(|e| Error::Parse(e.to_string()))?
    {
        Some(marker) => &raw_event[marker.end()..],
        None => raw_event,
    };

    match serde_json::from_str(payload.trim()) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(Error::Parse(format!("not a JSON object: {}", other))),
        Err(e) => Err(Error::Parse(e.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn entry(event: &str) -> LogEntry {
        LogEntry {
            id: "1".to_string(),
            timestamp: 1_704_067_200_000,
            message: format!("2024-01-01T00:00:00.000Z\tc0ffee-1\t{}", event),
            extracted_fields: Some(HashMap::from([
                ("timestamp".to_string(), "2024-01-01T00:00:00.123Z".to_string()),
                ("request_id".to_string(), "c0ffee-1".to_string()),
                ("event".to_string(), event.to_string()),
            ])),
        }
    }

    #[test]
    fn test_parse_with_level_marker() {
        let event = parse(&entry("INFO {\"message\":\"order placed\",\"duration_ms\":42}\n"))
            .expect("event");
        assert_eq!(event.get_str("message"), Some("order placed"));
        assert_eq!(event.get("duration_ms"), Some(&Value::from(42)));
        assert_eq!(event.get_str("requestId"), Some("c0ffee-1"));
        assert_eq!(event.get_str("timestamp"), Some("2024-01-01T00:00:00.123Z"));
    }

    #[test]
    fn test_parse_without_level_marker() {
        let event = parse(&entry(r#"{"level":"DEBUG","name":"checkout"}"#)).expect("event");
        assert_eq!(event.get_str("name"), Some("checkout"));
        assert_eq!(event.get_str("level"), Some("DEBUG"));
    }

    #[test]
    fn test_reserved_fields_win() {
        let event = parse(&entry(
            r#"{"requestId":"spoofed","timestamp":"yesterday","service_name":"orders"}"#,
        ))
        .expect("event");
        assert_eq!(event.get_str("requestId"), Some("c0ffee-1"));
        assert_eq!(event.get_str("timestamp"), Some("2024-01-01T00:00:00.123Z"));
        assert_eq!(event.service_name(), Some("orders"));
    }

    #[test]
    fn test_non_json_is_dropped() {
        assert!(parse(&entry("START RequestId: c0ffee-1 Version: $LATEST")).is_none());
        assert!(parse(&entry("INFO plain text message")).is_none());
        assert!(parse(&entry("[1, 2, 3]")).is_none());
        assert!(parse(&entry("")).is_none());
    }

    #[test]
    fn test_without_extracted_fields() {
        let entry = LogEntry {
            id: "1".to_string(),
            timestamp: 1_704_067_200_000,
            message: r#"{"name":"raw"}"#.to_string(),
            extracted_fields: None,
        };
        let event = parse(&entry).expect("event");
        assert_eq!(event.get_str("name"), Some("raw"));
        assert_eq!(event.get_str("timestamp"), Some("2024-01-01T00:00:00.000Z"));
        assert!(!event.contains_key("requestId"));
    }
}
