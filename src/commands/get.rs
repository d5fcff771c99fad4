use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::router::Router;

/// Get the value of `key`. If the key does not exist the special value `nil` is returned.
///
/// The destination is asked first. On a miss the source is asked, and a value found there is
/// written to the destination before it is returned. Only once that write succeeded, and only
/// with `delete_on_get`, is the key deleted from the source.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: Bytes,
}

impl Get {
    fn get(&self) -> Vec<Bytes> {
        vec![Bytes::from_static(b"GET"), self.key.clone()]
    }
}

#[async_trait]
impl Executable for Get {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame {
        let key = String::from_utf8_lossy(&self.key).into_owned();

        let destination_error = match router.call_destination(self.get()).await {
            Err(err) => return err.to_frame(),
            Ok(reply) if reply.is_nil() => None,
            Ok(Frame::Error(msg)) if router.policy().get_fallback_on_error => {
                debug!(key = %key, "Destination replied {}, falling back to source", msg);
                Some(msg)
            }
            Ok(reply) => return reply,
        };

        let value = match router.call_source(self.get()).await {
            Err(err) => return err.to_frame(),
            Ok(Frame::Bulk(value)) => value,
            Ok(reply) if reply.is_nil() => {
                return destination_error.map_or(Frame::Null, Frame::Error);
            }
            // Errors and anything that is not a string are relayed, nothing is copied.
            Ok(reply) => return reply,
        };

        let set = vec![Bytes::from_static(b"SET"), self.key.clone(), value.clone()];
        match router.call_destination(set).await {
            Err(err) => return err.to_frame(),
            Ok(Frame::Error(msg)) => {
                warn!(key = %key, "Copying to destination failed: {}", msg);
                return Frame::Error(msg);
            }
            Ok(_) => debug!(key = %key, "Copied from source to destination"),
        }

        if router.policy().delete_on_get {
            router.delete_from_source(vec![self.key]).await;
        }

        Frame::Bulk(value)
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.check_arity("get", 1, Some(1))?;
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}
