use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendError};
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::frame::Frame;

/// How aggressively keys are moved off the source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    /// Delete a key from the source once a read copied it to the destination.
    pub delete_on_get: bool,
    /// Delete a key from the source once the destination accepted a write or delete of it.
    pub delete_on_set: bool,
    /// Treat an error reply from the destination on GET like a miss.
    pub get_fallback_on_error: bool,
}

/// Applies the migration rules to commands. Holds no state of its own besides the backends, so
/// one router is shared by every client connection.
pub struct Router<B> {
    destination: B,
    source: Option<B>,
    policy: Policy,
}

impl<B: Backend> Router<B> {
    pub fn new(destination: B, source: Option<B>, policy: Policy) -> Router<B> {
        Router {
            destination,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn destination(&self) -> &B {
        &self.destination
    }

    pub fn source(&self) -> Option<&B> {
        self.source.as_ref()
    }

    /// Produces the one reply the client gets for `command`.
    pub async fn route(&self, command: Command) -> Frame {
        command.exec(self).await
    }

    pub(crate) async fn call_destination(&self, args: Vec<Bytes>) -> Result<Frame, BackendError> {
        self.destination.call(args).await.map_err(|err| {
            warn!("Destination call failed: {}", err);
            err
        })
    }

    /// Without a configured source every lookup is a miss.
    pub(crate) async fn call_source(&self, args: Vec<Bytes>) -> Result<Frame, BackendError> {
        let Some(source) = &self.source else {
            return Ok(Frame::Null);
        };

        source.call(args).await.map_err(|err| {
            warn!("Source call failed: {}", err);
            err
        })
    }

    /// Best effort: the destination already holds the authoritative state, so whatever happens
    /// here is only logged.
    pub(crate) async fn delete_from_source(&self, keys: Vec<Bytes>) {
        let Some(source) = &self.source else {
            return;
        };

        let mut args = Vec::with_capacity(1 + keys.len());
        args.push(Bytes::from_static(b"DEL"));
        args.extend(keys);

        match source.call(args).await {
            Ok(Frame::Error(msg)) => warn!("Source DEL replied with an error: {}", msg),
            Ok(reply) => debug!("Source DEL replied {}", reply),
            Err(err) => warn!("Source DEL failed: {}", err),
        }
    }
}
