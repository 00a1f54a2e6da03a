use base64::prelude::*;
use flate2::read::MultiGzDecoder;
use std::io::Read;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::RawBatch;
use crate::logs::{LogGroupRecord, TelemetryEvent};

/// Output of the decoder: log-group records for the parsers, plus any already
/// decoded events that go straight to the dispatcher.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub records: Vec<LogGroupRecord>,
    pub direct_events: Vec<TelemetryEvent>,
    pub decode_failures: usize,
}

pub fn decode(batch: RawBatch) -> Result<DecodedBatch, Error> {
    match batch {
        RawBatch::CompressedLogBundle(data) => Ok(DecodedBatch {
            records: vec![decode_bundle(&data)?],
            ..Default::default()
        }),
        RawBatch::StreamRecords(items) => {
            let mut decoded = DecodedBatch::default();
            for (index, data) in items.iter().enumerate() {
                let record = data
                    .as_deref()
                    .ok_or_else(|| Error::Decode("record has no kinesis.data".to_string()))
                    .and_then(decode_bundle);
                match record {
                    Ok(record) => decoded.records.push(record),
                    Err(error) => {
                        warn!(%error, "skipping kinesis record {}", index);
                        decoded.decode_failures += 1;
                    }
                }
            }
            Ok(decoded)
        }
        RawBatch::DirectEvents(items) => {
            let direct_events = items
                .into_iter()
                .filter_map(|item| match TelemetryEvent::try_from(item) {
                    Ok(event) => Some(event),
                    Err(other) => {
                        warn!("ignoring direct event that is not a JSON object: {}", other);
                        None
                    }
                })
                .collect();
            Ok(DecodedBatch {
                direct_events,
                ..Default::default()
            })
        }
    }
}

/// base64 -> gunzip -> JSON.
pub fn decode_bundle(data: &str) -> Result<LogGroupRecord, Error> {
    let compressed = BASE64_STANDARD.decode(data.trim())?;
    let payload = gunzip(&compressed)?;
    let record: LogGroupRecord = serde_json::from_slice(&payload)
        .map_err(|e| Error::Decode(format!("unexpected log bundle shape - {}", e)))?;

    debug!(
        "found [{}] logEvents from {} - {}",
        record.log_events.len(),
        record.log_group,
        record.log_stream
    );

    Ok(record)
}

fn gunzip(compressed_data: &[u8]) -> Result<Vec<u8>, Error> {
    if compressed_data.is_empty() {
        return Err(Error::Decode(
            "cannot ungzip a zero-byte payload".to_string(),
        ));
    }

    let mut output = Vec::new();
    MultiGzDecoder::new(compressed_data)
        .read_to_end(&mut output)
        .map_err(|e| {
            Error::Decode(format!(
                "problem decompressing data after {} bytes - {}",
                output.len(),
                e
            ))
        })?;

    Ok(output)
}
