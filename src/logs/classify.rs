use crate::logs::{LogGroupRecord, MessageType};

pub const API_GATEWAY_LOG_GROUP_PREFIX: &str = "API-Gateway-Execution-Logs";
pub const LAMBDA_LOG_GROUP_PREFIX: &str = "/aws/lambda";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    GatewayLogs,
    FunctionLogs,
    Control,
    Unknown,
}

/// Decides which parser a log-group record goes to. Control messages win over
/// any log-group naming.
pub fn classify(record: &LogGroupRecord) -> RecordKind {
    if record.message_type == MessageType::ControlMessage {
        return RecordKind::Control;
    }

    if record.log_group.starts_with(API_GATEWAY_LOG_GROUP_PREFIX) {
        RecordKind::GatewayLogs
    } else if record.log_group.starts_with(LAMBDA_LOG_GROUP_PREFIX) {
        RecordKind::FunctionLogs
    } else {
        RecordKind::Unknown
    }
}
