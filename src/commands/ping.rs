use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::router::Router;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
/// Answered by the proxy itself; no backend is contacted.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

#[async_trait]
impl Executable for Ping {
    async fn exec<B: Backend>(self, _router: &Router<B>) -> Frame {
        self.payload
            .map_or(Frame::Simple("PONG".to_string()), Frame::Bulk)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.check_arity("ping", 0, Some(1))?;

        let payload = match parser.next_bytes() {
            Ok(payload) => Some(payload),
            Err(CommandParserError::EndOfStream) => None,
            Err(e) => return Err(e),
        };

        Ok(Self { payload })
    }
}
