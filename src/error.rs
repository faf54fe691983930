// Error kinds for the fabric
//
// Every protocol-fatal boundary (chunk decode, AMF decode, handshake, FLV
// demux, registry lookups) gets a named variant here instead of a bare
// `Result<T, ()>`, so a caller can log or match on what actually went wrong.

use std::fmt;

/// Error decoding or encoding an RTMP chunk stream
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChunkError {
    #[error("connection closed while reading chunk header")]
    ConnectionClosed,

    #[error("read timed out")]
    ReadTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("chunk stream id {0} referenced before any type-0 header was seen")]
    MissingPreviousHeader(u32),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChunkError {
    fn from(e: std::io::Error) -> Self {
        ChunkError::Io(e.to_string())
    }
}

/// Error decoding an AMF0 or AMF3 value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AmfError {
    #[error("unexpected end of buffer while decoding AMF value")]
    UnexpectedEof,

    #[error("unknown AMF0 marker byte: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("unsupported AMF3 value shape (object/array/traits not decoded)")]
    UnsupportedAmf3Shape,

    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,
}

/// Error during the RTMP handshake
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    #[error("unsupported RTMP version byte: {0} (expected 3)")]
    UnsupportedVersion(u8),

    #[error("client signature too short: expected at least {expected} bytes, found {found}")]
    SignatureTooShort { expected: usize, found: usize },

    #[error("HMAC computation produced an unexpected digest length")]
    DigestLengthMismatch,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        HandshakeError::Io(e.to_string())
    }
}

/// Error demuxing an FLV audio/video tag body
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlvError {
    #[error("tag payload too short to contain a codec header")]
    PayloadTooShort,
}

/// Error muxing a packet into the HLS MPEG-TS segmenter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HlsError {
    #[error("AVC sequence header too short to contain a decoder configuration record")]
    InvalidAvcSequenceHeader,

    #[error("AAC sequence header too short to contain an audio specific config")]
    InvalidAacSequenceHeader,

    #[error("video packet received before an AVC sequence header was seen")]
    MissingVideoBootstrap,

    #[error("audio packet received before an AAC sequence header was seen")]
    MissingAudioBootstrap,
}

/// Error from the stream registry / fan-out engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("no stream is registered for key '{0}'")]
    UnknownKey(String),

    #[error("subscriber is closed")]
    SubscriberClosed,
}

/// Top-level error for a single RTMP session; any variant is connection-fatal
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Amf(#[from] AmfError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Flv(#[from] FlvError),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Error shape returned by the HTTP operation API handler contract
///
/// Mirrors the source's `{status: "error", data: "<msg>"}` JSON without
/// performing the serialization itself (binding an HTTP listener is out of
/// scope; the caller owns the wire format).
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    pub data: String,
}

impl OperationError {
    pub fn new(data: impl Into<String>) -> Self {
        OperationError { data: data.into() }
    }

    pub fn status(&self) -> &'static str {
        "error"
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl std::error::Error for OperationError {}
