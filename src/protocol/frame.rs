//! Length-prefixed binary frames.
//!
//! A datagram is consumed frame by frame with [try_parse_frame] until the
//! buffer holds no further complete frame. [decode_datagram] runs that loop
//! and keeps the error, if any, that stopped it; [parse_frame] is the lossy
//! form for callers that only care whether a message came out.
use log::trace;

use super::{ByteCursor, CodecError, Registry};

/// Width of the big-endian length field that opens every frame.
pub const LENGTH_FIELD_SIZE: usize = size_of::<u64>();

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A message that can be written as a binary frame.
pub trait WireMessage {
    /// Type tag the receiving [Registry] resolves. Must be ASCII.
    fn tag(&self) -> &'static str;

    /// Appends the fixed-layout payload to `out`.
    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// Outcome of framing a whole datagram.
#[derive(Debug)]
pub struct DatagramReport<T> {
    /// Decoded messages, in the order they appeared on the wire.
    pub messages: Vec<T>,
    /// Bytes covered by successfully decoded frames.
    pub consumed: usize,
    /// Length of the datagram.
    pub len: usize,
    /// Error that ended framing early, `None` if the buffer simply ran out.
    pub error: Option<CodecError>,
}

impl<T> DatagramReport<T> {
    /// Bytes left over after the last decoded frame.
    pub fn trailing(&self) -> usize {
        self.len - self.consumed
    }

    /// No error and no leftover bytes.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.trailing() == 0
    }
}

/// Decodes the frame starting at `offset`.
///
/// Returns `Ok(None)` when fewer bytes remain than the length field or the
/// declared frame size needs; those are "no more frames", not errors. On
/// success the returned offset points just past the frame.
pub fn try_parse_frame<T>(
    registry: &Registry<T>,
    datagram: &[u8],
    offset: usize,
) -> Result<Option<(T, usize)>, CodecError> {
    let mut cursor = ByteCursor::at(datagram, offset);
    let size = match cursor.read_u64() {
        Ok(size) => size,
        Err(e) if e.is_truncation() => return Ok(None),
        Err(e) => return Err(e),
    };

    let Some(size) = usize::try_from(size)
        .ok()
        .filter(|size| *size <= cursor.remaining())
    else {
        return Ok(None);
    };
    let region = cursor.read_bytes(size)?;
    let next = cursor.offset();

    let mut frame = ByteCursor::new(region);
    let tag_len = frame
        .read_u64()
        .map_err(|_| CodecError::MalformedFrame(format!("{size} byte frame has no tag")))?;
    let tag = usize::try_from(tag_len)
        .ok()
        .and_then(|len| frame.read_bytes(len).ok())
        .ok_or_else(|| {
            CodecError::MalformedFrame(format!("tag length {tag_len} overruns {size} byte frame"))
        })?;

    if !tag.is_ascii() {
        return Err(CodecError::MalformedFrame("tag is not ASCII".into()));
    }
    let tag = std::str::from_utf8(tag)
        .map_err(|_| CodecError::MalformedFrame("tag is not ASCII".into()))?;

    let payload = frame.rest();
    let (message, consumed) = registry.decode(tag, payload, 0)?;
    if consumed != payload.len() {
        return Err(CodecError::MalformedFrame(format!(
            "'{tag}' payload used {consumed} of {} bytes",
            payload.len()
        )));
    }

    trace!("decoded '{tag}' frame at {offset}..{next}");
    Ok(Some((message, next)))
}

/// Decodes the frame at `offset`, discarding the reason when none is found.
///
/// Yields `(None, offset)` for both truncation and malformed frames; the caller
/// must stop framing the datagram at that point.
pub fn parse_frame<T>(registry: &Registry<T>, datagram: &[u8], offset: usize) -> (Option<T>, usize) {
    match try_parse_frame(registry, datagram, offset) {
        Ok(Some((message, next))) => (Some(message), next),
        _ => (None, offset),
    }
}

/// Decodes every frame in a datagram.
///
/// The first malformed frame ends processing; the bytes after it are never
/// reinterpreted as a new frame.
pub fn decode_datagram<T>(registry: &Registry<T>, datagram: &[u8]) -> DatagramReport<T> {
    let mut messages = Vec::new();
    let mut offset = 0;
    let mut error = None;

    loop {
        match try_parse_frame(registry, datagram, offset) {
            Ok(Some((message, next))) if next > offset => {
                messages.push(message);
                offset = next;
            }
            Ok(_) => break,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    DatagramReport {
        messages,
        consumed: offset,
        len: datagram.len(),
        error,
    }
}

/// Appends one frame for `message` to `out`, returning the frame length.
///
/// Several frames may be appended to the same buffer to pack them into one
/// datagram; the whole buffer must still fit in [MAX_DATAGRAM_SIZE]. On error
/// `out` is left as it was.
pub fn encode_frame_into<M: WireMessage>(message: &M, out: &mut Vec<u8>) -> Result<usize, CodecError> {
    let start = out.len();
    let result = write_frame(message, out, start);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

/// Encodes `message` as a standalone frame.
pub fn encode_frame<M: WireMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_frame_into(message, &mut out)?;
    Ok(out)
}

fn write_frame<M: WireMessage>(message: &M, out: &mut Vec<u8>, start: usize) -> Result<usize, CodecError> {
    let tag = message.tag();
    if !tag.is_ascii() {
        return Err(CodecError::MalformedFrame(format!("tag '{tag}' is not ASCII")));
    }

    out.extend_from_slice(&[0; LENGTH_FIELD_SIZE]);
    out.extend_from_slice(&(tag.len() as u64).to_be_bytes());
    out.extend_from_slice(tag.as_bytes());
    message.encode_payload(out)?;

    if out.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: out.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let len = out.len() - start;

    let size = (len - LENGTH_FIELD_SIZE) as u64;
    out[start..start + LENGTH_FIELD_SIZE].copy_from_slice(&size.to_be_bytes());
    Ok(len)
}
