use itertools::Itertools;
use tracing::{debug, info};

use crate::logs::classify::{classify, RecordKind};
use crate::logs::{function, gateway, trace, LogGroupRecord, TelemetryEvent};

/// Runs every record through classification, parsing and trace correlation.
pub fn extract_events(records: Vec<LogGroupRecord>) -> Vec<TelemetryEvent> {
    records.iter().flat_map(record_events).collect_vec()
}

fn record_events(record: &LogGroupRecord) -> Vec<TelemetryEvent> {
    match classify(record) {
        RecordKind::GatewayLogs => {
            let events = gateway::parse_logs(record)
                .into_iter()
                .map(trace::correlate)
                .collect_vec();
            info!(
                "Generated {} API Gateway events from {} log lines of {}",
                events.len(),
                record.log_events.len(),
                record.log_group
            );
            events
        }
        RecordKind::FunctionLogs => {
            let events = record
                .log_events
                .iter()
                .filter_map(function::parse)
                .collect_vec();
            info!(
                "Generated {} Lambda events from {} log lines of {}",
                events.len(),
                record.log_events.len(),
                record.log_group
            );
            events
        }
        RecordKind::Control => {
            debug!("CloudWatch control message, ignored...");
            Vec::new()
        }
        RecordKind::Unknown => {
            debug!("unknown CW log event type, ignored... {}", record.log_group);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logs::{LogEntry, MessageType};
    use std::collections::HashMap;

    fn record(log_group: &str, message_type: MessageType, messages: &[&str]) -> LogGroupRecord {
        LogGroupRecord {
            log_group: log_group.to_string(),
            log_stream: "stream".to_string(),
            message_type,
            owner: "123456789012".to_string(),
            subscription_filters: Vec::new(),
            log_events: messages
                .iter()
                .enumerate()
                .map(|(i, message)| LogEntry {
                    id: i.to_string(),
                    timestamp: 1_704_067_200_000 + i as i64,
                    message: message.to_string(),
                    extracted_fields: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_gateway_events_are_correlated() {
        let gateway = record(
            "API-Gateway-Execution-Logs_a1b2c3/prod",
            MessageType::DataMessage,
            &[
                "(r-1) HTTP Method: GET, Resource Path: /orders",
                "(r-1) Method request headers: {Host=api.example.com}",
                "(r-1) Endpoint response headers: {x-amzn-RequestId=lambda-1}",
                "(r-1) Method response headers: {x-correlation-id=T9}",
                "(r-1) Method completed with status: 503",
            ],
        );

        let events = extract_events(vec![gateway]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str("trace.trace_id"), Some("T9"));
        assert_eq!(events[0].get_str("trace.span_id"), Some("T9-span"));
        assert_eq!(events[0].get_str("name"), Some("GET /orders"));
    }

    #[test]
    fn test_function_events_are_not_correlated() {
        let mut lambda = record(
            "/aws/lambda/orders-api",
            MessageType::DataMessage,
            &[r#"{"name":"checkout"}"#, "END RequestId: r-2"],
        );
        lambda.log_events[0].extracted_fields = Some(HashMap::from([
            ("request_id".to_string(), "r-2".to_string()),
            ("timestamp".to_string(), "2024-01-01T00:00:00.000Z".to_string()),
            ("event".to_string(), r#"INFO {"name":"checkout"}"#.to_string()),
        ]));

        let events = extract_events(vec![lambda]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str("requestId"), Some("r-2"));
        assert!(!events[0].contains_key("trace.trace_id"));
    }

    #[test]
    fn test_control_and_unknown_records_are_dropped() {
        let control = record(
            "/aws/lambda/orders-api",
            MessageType::ControlMessage,
            &[r#"{"name":"heartbeat"}"#],
        );
        let unknown = record("/ecs/orders", MessageType::DataMessage, &[r#"{"a":1}"#]);

        assert!(extract_events(vec![control, unknown]).is_empty());
    }
}
