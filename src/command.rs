//! Game commands carried by the binary frame format.
//!
//! This module defines the built-in [`Command`] set and its wire layouts. Every
//! variant wraps a fixed-layout payload struct that bincode writes in network
//! byte order with fixed-width integers, so the payload size of a tag never
//! changes.
//!
//! # Overview
//!
//! | Tag     | Payload                                   | Bytes |
//! |---------|-------------------------------------------|-------|
//! | `Move`  | `uid: u64, pos_x: f32, pos_y: f32`         | 16    |
//! | `Spawn` | `uid: u64, kind: i32, pos_x: f32, pos_y: f32` | 20 |
//! | `Input` | `key_code: u16`                           | 2     |
//!
//! New message types are added by registering another decoder in the
//! [`Registry`]; a completely separate message set can implement
//! [`WireMessage`] and use its own `Registry<T>`.
//!
//! # Example
//! ```rust
//! use wirebridge::{Command, protocol::{decode_datagram, encode_frame}};
//!
//! let bytes = encode_frame(&Command::moved(7, 1.0, 2.0)).unwrap();
//! let report = decode_datagram(&Command::registry(), &bytes);
//! assert_eq!(report.messages, vec![Command::moved(7, 1.0, 2.0)]);
//! ```
use bincode::{Decode, Encode, encode_into_std_write};

use crate::protocol::{CodecError, Registry, WireMessage, decode_payload, wire_config};

pub const MOVE_TAG: &str = "Move";
pub const SPAWN_TAG: &str = "Spawn";
pub const INPUT_TAG: &str = "Input";

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct Move {
    pub uid: u64,
    pub pos_x: f32,
    pub pos_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct Spawn {
    pub uid: u64,
    pub kind: i32,
    pub pos_x: f32,
    pub pos_y: f32,
}

/// Raw key press. Codes outside [KeyCode] are carried unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Input {
    pub key_code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Spacebar = 0,
    W = 1,
}

impl TryFrom<u16> for KeyCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyCode::Spacebar),
            1 => Ok(KeyCode::W),
            code => Err(code),
        }
    }
}

impl From<KeyCode> for u16 {
    fn from(value: KeyCode) -> Self {
        value as u16
    }
}

impl Input {
    pub fn key(&self) -> Option<KeyCode> {
        KeyCode::try_from(self.key_code).ok()
    }
}

/// Decoded message exchanged between game clients and servers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Move(Move),
    Spawn(Spawn),
    Input(Input),
}

impl Command {
    pub fn moved(uid: u64, pos_x: f32, pos_y: f32) -> Self {
        Command::Move(Move { uid, pos_x, pos_y })
    }

    pub fn spawn(uid: u64, kind: i32, pos_x: f32, pos_y: f32) -> Self {
        Command::Spawn(Spawn {
            uid,
            kind,
            pos_x,
            pos_y,
        })
    }

    pub fn input(key: KeyCode) -> Self {
        Command::Input(Input {
            key_code: key.into(),
        })
    }

    /// Registry resolving every built-in tag.
    pub fn registry() -> Registry<Command> {
        let mut registry = Registry::new();
        registry.register(MOVE_TAG, decode_move);
        registry.register(SPAWN_TAG, decode_spawn);
        registry.register(INPUT_TAG, decode_input);
        registry
    }
}

pub fn decode_move(buf: &[u8]) -> Result<(Command, usize), CodecError> {
    let (payload, consumed) = decode_payload::<Move>(buf)?;
    Ok((Command::Move(payload), consumed))
}

pub fn decode_spawn(buf: &[u8]) -> Result<(Command, usize), CodecError> {
    let (payload, consumed) = decode_payload::<Spawn>(buf)?;
    Ok((Command::Spawn(payload), consumed))
}

pub fn decode_input(buf: &[u8]) -> Result<(Command, usize), CodecError> {
    let (payload, consumed) = decode_payload::<Input>(buf)?;
    Ok((Command::Input(payload), consumed))
}

impl WireMessage for Command {
    fn tag(&self) -> &'static str {
        match self {
            Command::Move(_) => MOVE_TAG,
            Command::Spawn(_) => SPAWN_TAG,
            Command::Input(_) => INPUT_TAG,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match *self {
            Command::Move(payload) => encode_into_std_write(payload, out, wire_config())?,
            Command::Spawn(payload) => encode_into_std_write(payload, out, wire_config())?,
            Command::Input(payload) => encode_into_std_write(payload, out, wire_config())?,
        };
        Ok(())
    }
}
