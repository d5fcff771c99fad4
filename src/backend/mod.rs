pub mod pool;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::frame::{self, Frame};

pub use pool::{Pool, PooledConnection};

/// Something that answers one command with one reply. The router only ever talks to backends
/// through this, which lets it run against in-memory fakes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Sends `args` as a RESP array of bulk strings and awaits exactly one reply. A RESP error
    /// reply is a successful call returning `Frame::Error`.
    async fn call(&self, args: Vec<Bytes>) -> Result<Frame, BackendError>;
}

#[derive(Debug, ThisError)]
pub enum BackendError {
    #[error("backend i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("backend did not answer in time")]
    Timeout,
    #[error("backend closed the connection")]
    ConnectionClosed,
    #[error("backend sent a malformed reply: {0}")]
    Protocol(frame::Error),
    #[error("backend pool exhausted")]
    PoolExhausted,
    #[error("backend pool closed")]
    PoolClosed,
}

impl BackendError {
    /// The reply sent to the client in place of the backend's answer.
    pub fn to_frame(&self) -> Frame {
        match self {
            BackendError::PoolExhausted => Frame::error("ERR backend pool exhausted"),
            BackendError::PoolClosed => Frame::error("ERR backend pool closed"),
            _ => Frame::error("ERR backend unavailable"),
        }
    }
}

impl From<frame::Error> for BackendError {
    fn from(err: frame::Error) -> BackendError {
        match err {
            frame::Error::Io(err) => BackendError::Io(err),
            err => BackendError::Protocol(err),
        }
    }
}
