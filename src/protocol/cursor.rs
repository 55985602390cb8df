//! Network byte order readers.
//!
//! Every reader takes a buffer and an offset and returns the decoded value
//! together with the number of bytes it consumed. Values on the wire are
//! big-endian and are converted to host order regardless of the host's
//! endianness. The functions are pure; [`ByteCursor`] wraps them for callers
//! that want to walk a buffer sequentially.
use super::CodecError;

/// Returns `len` bytes starting at `offset`, or [CodecError::TruncatedInput].
pub fn read_bytes(buf: &[u8], offset: usize, len: usize) -> Result<(&[u8], usize), CodecError> {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < len {
        return Err(CodecError::TruncatedInput {
            needed: len,
            remaining,
        });
    }

    Ok((&buf[offset..offset + len], len))
}

macro_rules! be_reader {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(buf: &[u8], offset: usize) -> Result<($ty, usize), CodecError> {
            const WIDTH: usize = size_of::<$ty>();
            let (bytes, consumed) = read_bytes(buf, offset, WIDTH)?;
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(bytes);
            Ok((<$ty>::from_be_bytes(raw), consumed))
        }
    };
}

be_reader!(read_u16, u16);
be_reader!(read_u32, u32);
be_reader!(
    /// Reads the 8-byte length fields used by the binary frame format.
    read_u64,
    u64
);
be_reader!(read_i32, i32);
be_reader!(read_i64, i64);
be_reader!(
    /// Reads an IEEE-754 single from its big-endian bit pattern.
    read_f32,
    f32
);
be_reader!(read_f64, f64);

/// Sequential reader over a borrowed buffer.
///
/// A failed read leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

macro_rules! cursor_reader {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, CodecError> {
            let (value, consumed) = $name(self.buf, self.offset)?;
            self.offset += consumed;
            Ok(value)
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self { buf, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.offset.min(self.buf.len())..]
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let (bytes, consumed) = read_bytes(self.buf, self.offset, len)?;
        self.offset += consumed;
        Ok(bytes)
    }

    cursor_reader!(read_u16, u16);
    cursor_reader!(read_u32, u32);
    cursor_reader!(read_u64, u64);
    cursor_reader!(read_i32, i32);
    cursor_reader!(read_i64, i64);
    cursor_reader!(read_f32, f32);
    cursor_reader!(read_f64, f64);
}
