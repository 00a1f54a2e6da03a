use thiserror::Error;

/// Failures surfaced by the shipper.
///
/// `Decode`, `Parse` and `Send` are local to one record, line or event and are
/// absorbed by the pipeline. `UnsupportedSource`, `Initialization` and `Config`
/// fail the invocation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to decode log bundle: {0}")]
    Decode(String),

    #[error("unsupported event source. Only CloudWatch Logs and Kinesis are supported: {0}")]
    UnsupportedSource(String),

    #[error("failed to parse log line: {0}")]
    Parse(String),

    #[error("failed to send event to Honeycomb: {0}")]
    Send(String),

    #[error("could not initialize the Honeycomb client: {0}")]
    Initialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Decode(format!("invalid base64 - {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Send(e.to_string())
    }
}
