pub mod del;
pub mod executable;
pub mod forward;
pub mod get;
pub mod ping;
pub mod quit;
pub mod set;

use std::str::{self, FromStr};
use std::vec;

use async_trait::async_trait;
use bytes::Bytes;
use strum_macros::EnumString;
use thiserror::Error as ThisError;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::router::Router;

use del::Del;
use forward::Forward;
use get::Get;
use ping::Ping;
use quit::Quit;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Del(Del),
    Get(Get),
    Set(Set),

    Ping(Ping),
    Quit(Quit),

    /// Any verb without migration semantics, passed to the destination untouched.
    Forward(Forward),
}

/// Verbs handled by the proxy itself. Matching is ASCII case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum Verb {
    Del,
    Get,
    Ping,
    Quit,
    Set,
}

#[async_trait]
impl Executable for Command {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame {
        match self {
            Command::Del(cmd) => cmd.exec(router).await,
            Command::Forward(cmd) => cmd.exec(router).await,
            Command::Get(cmd) => cmd.exec(router).await,
            Command::Ping(cmd) => cmd.exec(router).await,
            Command::Quit(cmd) => cmd.exec(router).await,
            Command::Set(cmd) => cmd.exec(router).await,
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let mut parts = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame {
                Frame::Bulk(bytes) => parts.push(bytes),
                Frame::Simple(s) => parts.push(Bytes::from(s)),
                frame => {
                    return Err(CommandParserError::InvalidFrame {
                        expected: "simple or bulk string".to_string(),
                        actual: frame,
                    })
                }
            }
        }

        let parser = &mut CommandParser {
            parts: parts.into_iter(),
        };

        let command_name = parser.parse_command_name()?;
        let verb = str::from_utf8(&command_name)
            .ok()
            .and_then(|name| Verb::from_str(name).ok());

        match verb {
            Some(Verb::Del) => Del::try_from(parser).map(Command::Del),
            Some(Verb::Get) => Get::try_from(parser).map(Command::Get),
            Some(Verb::Ping) => Ping::try_from(parser).map(Command::Ping),
            Some(Verb::Quit) => Ok(Command::Quit(Quit)),
            Some(Verb::Set) => Set::try_from(parser).map(Command::Set),
            None => {
                let mut args = Vec::with_capacity(parser.parts.len() + 1);
                args.push(command_name);
                args.extend(parser.remaining());
                Ok(Command::Forward(Forward { args }))
            }
        }
    }
}

pub(crate) struct CommandParser {
    parts: vec::IntoIter<Bytes>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<Bytes, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EmptyCommand)
    }

    /// Fails unless the arguments left after the command name number between `min` and `max`.
    fn check_arity(
        &self,
        command: &'static str,
        min: usize,
        max: Option<usize>,
    ) -> Result<(), CommandParserError> {
        let len = self.parts.len();
        if len < min || max.is_some_and(|max| len > max) {
            return Err(CommandParserError::WrongArity { command });
        }
        Ok(())
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EndOfStream)
    }

    fn remaining(&mut self) -> Vec<Bytes> {
        self.parts.by_ref().collect()
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("protocol error; invalid frame, expected {expected}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("protocol error; empty command")]
    EmptyCommand,
    #[error("wrong number of arguments for '{command}' command")]
    WrongArity { command: &'static str },
    #[error("protocol error; the command frame was fully consumed")]
    EndOfStream,
}

impl CommandParserError {
    /// Protocol errors end the client connection. The rest are answered and the client carries on.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, CommandParserError::WrongArity { .. })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Error(format!("ERR {}", self))
    }
}
