use thiserror::Error;

/// Failures at the edges of an analysis run: reading the capture, the config, or writing output.
///
/// The analysis stages themselves never produce one of these.
#[derive(Debug, Error)]
pub enum AnalyserError {
    #[error("capture file not found: {0}")]
    CaptureNotFound(String),

    #[error("failed to decode capture: {0}")]
    Decoder(#[source] std::io::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl AnalyserError {
    /// True when the capture itself could not be turned into packets.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, AnalyserError::CaptureNotFound(_) | AnalyserError::Decoder(_))
    }
}
