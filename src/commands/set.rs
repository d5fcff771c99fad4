use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::router::Router;

/// Set `key` to hold the string `value` on the destination. Options (`EX`, `PX`, `NX`, `XX`, ...)
/// are not interpreted, they travel with the command as received. With `delete_on_set` a write
/// the destination accepted also deletes the key from the source.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub options: Vec<Bytes>,
}

impl Set {
    fn has_option(&self, name: &str) -> bool {
        self.options
            .iter()
            .any(|option| option.eq_ignore_ascii_case(name.as_bytes()))
    }

    /// Whether `reply` says the destination did not store the value. `NX`/`XX` refusals come
    /// back as nil, but with `GET` a nil only means there was no previous value.
    fn refused(&self, reply: &Frame) -> bool {
        match reply {
            Frame::Error(_) => true,
            reply if reply.is_nil() => {
                !self.has_option("GET") || self.has_option("NX") || self.has_option("XX")
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Executable for Set {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame {
        let mut args = Vec::with_capacity(3 + self.options.len());
        args.push(Bytes::from_static(b"SET"));
        args.push(self.key.clone());
        args.push(self.value.clone());
        args.extend(self.options.iter().cloned());

        let reply = match router.call_destination(args).await {
            Ok(reply) => reply,
            Err(err) => return err.to_frame(),
        };

        if self.refused(&reply) {
            debug!(
                key = %String::from_utf8_lossy(&self.key),
                "Destination did not store the value, source left untouched"
            );
            return reply;
        }

        if router.policy().delete_on_set {
            router.delete_from_source(vec![self.key]).await;
        }

        reply
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.check_arity("set", 2, None)?;

        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;
        let options = parser.remaining();

        Ok(Self {
            key,
            value,
            options,
        })
    }
}
