//! RESP Codec for Tokio
//!
//! Implements Encoder and Decoder traits for framed I/O.

use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;
use super::frame::{Frame, ParseError};

/// Tokio codec for RESP2 frames
#[derive(Debug, Default)]
pub struct RespCodec;

impl RespCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor).map_err(invalid_data)?;
                src.advance(len);
                Ok(Some(frame))
            }
            Err(ParseError::Incomplete) => Ok(None),
            Err(err) => Err(invalid_data(err)),
        }
    }
}

fn invalid_data(err: ParseError) -> io::Error {
    let msg = match err {
        ParseError::Incomplete => "incomplete frame".to_string(),
        ParseError::Invalid(msg) => msg,
    };
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl Encoder<Frame> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<Command> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.into_frame().encode(dst);
        Ok(())
    }
}
