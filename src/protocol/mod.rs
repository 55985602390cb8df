//! Message framing protocol.
//!
//! This module defines how typed messages are laid out inside UDP datagrams and
//! how they are recovered on the other side. It provides the byte-level readers,
//! the tag-to-decoder registry, and two framing strategies.
//!
//! # Overview
//!
//! A datagram carries one or more frames packed back to back. Each frame names
//! its message type with a string tag; the [`Registry`] maps that tag to the
//! decoder for the fixed-layout payload that follows. Decoding is fail-closed:
//! the first frame that cannot be decoded ends processing of the datagram,
//! nothing after it is reinterpreted as a new frame.
//!
//! # Key Components
//!
//! - [`ByteCursor`]: Big-endian fixed-width readers over a byte slice.
//! - [`Registry`]: Tag to decoder mapping, open for new message types.
//! - [`frame`]: Length-prefixed binary frames (`decode_datagram`, `encode_frame`).
//! - [`envelope`]: JSON RPC envelopes delimited by brace scanning.
//!
//! # Binary Format
//!
//! ```text
//! +-----------+--------------+-------------+-------------------+
//! | size: u64 | tag_len: u64 | tag: ASCII  | payload           |
//! +-----------+--------------+-------------+-------------------+
//!             |<------------------ size bytes ---------------->|
//! ```
//!
//! - All integers are big-endian (network order) and fixed width.
//! - `size` covers everything after the length field.
//! - The tag prefix is the same layout bincode uses for strings, so payloads and
//!   tags share one configuration (see [`wire_config`]).
//!
//! # See Also
//!
//! - [`endpoint`](crate::endpoint): Socket actors that drive these codecs.
//! - [`queue`](crate::queue): Where decoded messages are handed to the application.
pub mod cursor;
pub mod envelope;
mod error;
pub mod frame;
mod registry;

use bincode::config::{BigEndian, Configuration, Fixint};

pub use cursor::ByteCursor;
pub use envelope::{BoundsScan, RpcEnvelope};
pub use error::CodecError;
pub use frame::{
    DatagramReport, LENGTH_FIELD_SIZE, MAX_DATAGRAM_SIZE, WireMessage, decode_datagram,
    encode_frame, encode_frame_into, parse_frame, try_parse_frame,
};
pub use registry::{Decoder, Registry, decode_payload};

/// Bincode configuration for every payload on the wire: network byte order,
/// fixed-width integers.
pub fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}
