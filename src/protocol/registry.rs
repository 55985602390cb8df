use std::collections::HashMap;

use bincode::Decode;

use super::{CodecError, wire_config};

/// Decodes one payload from the start of a slice and reports how many bytes
/// it consumed.
pub type Decoder<T> = fn(&[u8]) -> Result<(T, usize), CodecError>;

/// Maps a message type tag to the decoder for its payload.
///
/// Each decoder knows its own wire layout; the registry only resolves names.
/// `T` is the message type produced; `Command::registry()` holds
/// the built-in [Command](crate::Command) set.
pub struct Registry<T> {
    decoders: HashMap<String, Decoder<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `decoder` under `tag`, returning the decoder it replaced.
    pub fn register(&mut self, tag: impl Into<String>, decoder: Decoder<T>) -> Option<Decoder<T>> {
        self.decoders.insert(tag.into(), decoder)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes the payload for `tag` found at `offset` in `buf`.
    ///
    /// An unregistered tag is reported as [CodecError::UnknownType]; the caller
    /// decides whether to abandon the rest of the buffer.
    pub fn decode(&self, tag: &str, buf: &[u8], offset: usize) -> Result<(T, usize), CodecError> {
        let decoder = self
            .decoders
            .get(tag)
            .ok_or_else(|| CodecError::UnknownType(tag.to_string()))?;

        if offset > buf.len() {
            return Err(CodecError::TruncatedInput {
                needed: offset - buf.len(),
                remaining: 0,
            });
        }

        decoder(&buf[offset..])
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags = self.tags().collect::<Vec<_>>();
        tags.sort_unstable();
        f.debug_struct("Registry").field("tags", &tags).finish()
    }
}

/// Decodes a fixed-layout payload with the shared wire configuration.
pub fn decode_payload<P: Decode<()>>(buf: &[u8]) -> Result<(P, usize), CodecError> {
    Ok(bincode::decode_from_slice(buf, wire_config())?)
}
