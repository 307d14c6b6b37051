//! Error taxonomy for the streaming engine.

use thiserror::Error;

/// Every error the engine can report, either synchronously from a message
/// handler or asynchronously from the worker thread via [`crate::host::HostApi::log_error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SoundfileError {
    /// No registered codec's `isHeader` matched the file.
    #[error("{filename}: unrecognized header")]
    UnknownHeader { filename: String },

    /// A codec claimed the header but its `readHeader` failed.
    #[error("{filename}: malformed {codec} header")]
    MalformedHeader { filename: String, codec: &'static str },

    /// The codec recognizes the container but not this revision of it.
    #[error("{filename}: unsupported {codec} version")]
    UnsupportedVersion { filename: String, codec: &'static str },

    /// The codec recognizes the container but not this sample encoding.
    #[error("{filename}: unsupported {codec} sample format ({bytes_per_sample} bytes/sample)")]
    UnsupportedSampleFormat {
        filename: String,
        codec: &'static str,
        bytes_per_sample: u8,
    },

    /// After applying onset and loop parameters, nothing can be streamed.
    #[error("{filename}: no data to stream")]
    Empty { filename: String },

    /// An OS-level I/O failure (open/seek/read/write).
    #[error("{filename}: I/O error: {message}")]
    Os { filename: String, message: String },

    /// A message's arguments failed validation; reported synchronously,
    /// never changes stream state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SoundfileError {
    pub fn os(filename: impl Into<String>, err: std::io::Error) -> Self {
        SoundfileError::Os {
            filename: filename.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SoundfileError>;
