//! JSON RPC envelopes.
//!
//! Envelopes carry no length prefix: the object has to start at byte 0 and its
//! extent is found by scanning for the brace that closes it. Whatever follows
//! the closing brace belongs to the caller (usually the RPC argument body).
//!
//! The default [`BoundsScan::BraceCount`] scanner counts every brace, including
//! braces inside string literals, so `{"msg_id":"}"}` is cut short after the
//! quoted brace. [`BoundsScan::StringAware`] skips string contents.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CodecError;

/// Header of an RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub msg_id: String,
    /// Remaining header fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RpcEnvelope {
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            extra: Map::new(),
        }
    }
}

/// Strategy used to locate the end of an envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoundsScan {
    #[default]
    BraceCount,
    StringAware,
}

impl BoundsScan {
    pub fn find(self, buf: &[u8]) -> Option<usize> {
        match self {
            BoundsScan::BraceCount => find_json_object_bounds(buf),
            BoundsScan::StringAware => find_json_object_bounds_string_aware(buf),
        }
    }
}

/// Exclusive end offset of the `{...}` object opening `buf`.
///
/// Counts braces without looking at string literals.
pub fn find_json_object_bounds(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    for (i, b) in buf.iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Like [find_json_object_bounds], but ignores braces inside strings.
pub fn find_json_object_bounds_string_aware(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Decodes the envelope at the start of `buf`, returning it with the number
/// of bytes it occupies.
pub fn decode_envelope(buf: &[u8], scan: BoundsScan) -> Result<(RpcEnvelope, usize), CodecError> {
    let end = scan
        .find(buf)
        .ok_or_else(|| CodecError::MalformedEnvelope("no balanced object at start of buffer".into()))?;
    let envelope = serde_json::from_slice(&buf[..end])
        .map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;
    Ok((envelope, end))
}

/// Lossy form of [decode_envelope]: `(None, 0)` on any failure.
pub fn try_decode_envelope(buf: &[u8]) -> (Option<RpcEnvelope>, usize) {
    match decode_envelope(buf, BoundsScan::BraceCount) {
        Ok((envelope, consumed)) => (Some(envelope), consumed),
        Err(_) => (None, 0),
    }
}

/// Splits an RPC message into its envelope and the body that follows it.
pub fn split_rpc(buf: &[u8], scan: BoundsScan) -> Result<(RpcEnvelope, &[u8]), CodecError> {
    let (envelope, consumed) = decode_envelope(buf, scan)?;
    Ok((envelope, &buf[consumed..]))
}

pub fn encode_envelope(envelope: &RpcEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
}
