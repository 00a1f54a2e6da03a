use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::Error;

const KINESIS_EVENT_SOURCE: &str = "aws:kinesis";

/// The trigger payloads the shipper accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBatch {
    /// `{ "awslogs": { "data": "<base64 gzip>" } }` from a CloudWatch Logs subscription.
    CompressedLogBundle(String),
    /// `{ "Records": [{ "eventSource": "aws:kinesis", "kinesis": { "data": ... } }] }`,
    /// one bundle per record. `None` marks a record without a `kinesis.data` string.
    StreamRecords(Vec<Option<String>>),
    /// A bare array of already decoded events, used for direct invocations.
    DirectEvents(Vec<Value>),
}

#[derive(serde::Deserialize)]
struct LogsEvent {
    awslogs: AwsLogs,
}

#[derive(serde::Deserialize)]
struct AwsLogs {
    data: String,
}

#[derive(serde::Deserialize)]
struct KinesisEvent {
    #[serde(rename = "Records")]
    records: Vec<Value>,
}

#[derive(serde::Deserialize)]
struct KinesisEventRecord {
    kinesis: KinesisRecord,
}

#[derive(serde::Deserialize)]
struct KinesisRecord {
    data: String,
}

impl TryFrom<Value> for RawBatch {
    type Error = Error;

    fn try_from(raw_value: Value) -> Result<Self, Error> {
        if let Value::Array(items) = raw_value {
            info!("direct invocation detected");
            return Ok(RawBatch::DirectEvents(items));
        }

        if let Ok(event) = LogsEvent::deserialize(&raw_value) {
            info!("cloudwatch event detected");
            return Ok(RawBatch::CompressedLogBundle(event.awslogs.data));
        }

        if let Ok(event) = KinesisEvent::deserialize(&raw_value) {
            let from_kinesis = event
                .records
                .first()
                .and_then(|record| record.get("eventSource"))
                .and_then(Value::as_str)
                == Some(KINESIS_EVENT_SOURCE);

            if from_kinesis {
                info!("kinesis event detected");
                return Ok(RawBatch::StreamRecords(
                    event
                        .records
                        .iter()
                        .map(|record| {
                            KinesisEventRecord::deserialize(record)
                                .ok()
                                .map(|record| record.kinesis.data)
                        })
                        .collect(),
                ));
            }
        }

        Err(Error::UnsupportedSource(raw_value.to_string()))
    }
}
