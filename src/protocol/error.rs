use thiserror::Error;

/// Failures raised while framing or unframing messages.
///
/// Every variant is recoverable: the endpoint loops log them and stop
/// processing the current datagram, they never tear down a socket.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] bincode::error::DecodeError),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

impl CodecError {
    /// `true` for errors that only mean "the buffer ended early".
    pub fn is_truncation(&self) -> bool {
        matches!(self, CodecError::TruncatedInput { .. })
    }
}
