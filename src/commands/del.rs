use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::router::Router;

/// Removes the specified keys from the destination and replies with its count. With
/// `delete_on_set` the keys are then removed from the source too, whatever it answers.
///
/// Ref: <https://redis.io/commands/del>
#[derive(Debug, PartialEq)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

#[async_trait]
impl Executable for Del {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame {
        let mut args = Vec::with_capacity(1 + self.keys.len());
        args.push(Bytes::from_static(b"DEL"));
        args.extend(self.keys.iter().cloned());

        let reply = match router.call_destination(args).await {
            Ok(reply) => reply,
            Err(err) => return err.to_frame(),
        };

        if matches!(reply, Frame::Error(_)) {
            return reply;
        }

        if router.policy().delete_on_set {
            router.delete_from_source(self.keys).await;
        }

        reply
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.check_arity("del", 1, None)?;
        let keys = parser.remaining();
        Ok(Self { keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[test]
    fn multiple_keys() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("DEL")),
            Frame::Bulk(Bytes::from("foo")),
            Frame::Bulk(Bytes::from("bar")),
            Frame::Bulk(Bytes::from("baz")),
        ]);
        let cmd = Command::try_from(frame).unwrap();
        assert_eq!(
            cmd,
            Command::Del(Del {
                keys: vec![Bytes::from("foo"), Bytes::from("bar"), Bytes::from("baz")]
            })
        );
    }

    #[test]
    fn single_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("DEL")),
            Frame::Bulk(Bytes::from("foo")),
        ]);
        let cmd = Command::try_from(frame).unwrap();
        assert_eq!(
            cmd,
            Command::Del(Del {
                keys: vec![Bytes::from("foo")]
            })
        );
    }

    #[test]
    fn zero_keys() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("DEL"))]);
        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(err, CommandParserError::WrongArity { command: "del" });
    }
}
