//! Error taxonomy for the control channel and the streaming decoder.

use crate::codec::CodecError;
use std::time::Duration;

/// Result type used by the control session and the device facade.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level failure on the control connection (connect, EOF, reset).
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    /// Well-formed error reply carrying the vendor error code.
    #[error("sensor rejected command with error code {code:#06x}")]
    SensorRejected { code: u16 },
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("no active session")]
    NoSession,
    #[error("not connected")]
    NotConnected,
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CommandTimeout(_))
    }

    /// Errors after which the current session cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::LoginFailed(_))
    }
}

/// Which part of a streamed frame an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Datagram,
    DataHeader,
    GeneralSystemState,
    DerivedValues,
    MeasurementData,
    IntrusionData,
    ApplicationData,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Section::Datagram => "datagram",
            Section::DataHeader => "data header",
            Section::GeneralSystemState => "general system state",
            Section::DerivedValues => "derived values",
            Section::MeasurementData => "measurement data",
            Section::IntrusionData => "intrusion data",
            Section::ApplicationData => "application data",
        };
        f.write_str(name)
    }
}

/// Failure to decode one unit of the scan stream (a datagram, a frame, or one section of it).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("{section}: {source}")]
    Codec {
        section: Section,
        #[source]
        source: CodecError,
    },
    #[error("{section}: block at offset {offset} with size {size} exceeds frame of {frame_len} bytes")]
    BlockOutOfBounds {
        section: Section,
        offset: usize,
        size: usize,
        frame_len: usize,
    },
    #[error("{section}: {reason}")]
    Invalid { section: Section, reason: String },
}

impl DecodeError {
    pub fn invalid(section: Section, reason: impl Into<String>) -> Self {
        DecodeError::Invalid {
            section,
            reason: reason.into(),
        }
    }

    pub fn section(&self) -> Section {
        match self {
            DecodeError::Codec { section, .. }
            | DecodeError::BlockOutOfBounds { section, .. }
            | DecodeError::Invalid { section, .. } => *section,
        }
    }
}

/// Attach the section a codec failure happened in.
pub(crate) trait InSection<T> {
    fn in_section(self, section: Section) -> std::result::Result<T, DecodeError>;
}

impl<T> InSection<T> for std::result::Result<T, CodecError> {
    fn in_section(self, section: Section) -> std::result::Result<T, DecodeError> {
        self.map_err(|source| DecodeError::Codec { section, source })
    }
}
