//! Node Connection
//!
//! One framed RESP connection. Commands are pipelined: all requests are
//! written before the first reply is read.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::protocol::{Command, Frame, RespCodec};

pub struct Connection {
    framed: Framed<TcpStream, RespCodec>,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, RespCodec::new()),
        })
    }

    /// Send `commands` in one flush and collect one reply per command.
    pub async fn pipeline(&mut self, commands: Vec<Command>) -> Result<Vec<Frame>> {
        let count = commands.len();
        for command in commands {
            debug!(cmd = command.name(), "queue");
            self.framed.feed(command).await?;
        }
        SinkExt::<Command>::flush(&mut self.framed).await?;

        let mut replies = Vec::with_capacity(count);
        while replies.len() < count {
            match self.framed.next().await {
                Some(frame) => replies.push(frame?),
                None => {
                    return Err(CacheError::from(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    )))
                }
            }
        }
        Ok(replies)
    }
}
