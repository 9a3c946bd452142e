//! RESP2 Protocol
//!
//! Framing, command construction and reply decoding for talking to
//! Redis-compatible nodes.

mod codec;
mod command;
mod frame;
pub mod response;

pub use codec::RespCodec;
pub use command::Command;
pub use frame::{Frame, ParseError};
