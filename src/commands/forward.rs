use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::router::Router;

/// A command the proxy has no migration semantics for. The arguments, verb included, go to the
/// destination as received and its reply comes back unchanged.
#[derive(Debug, PartialEq)]
pub struct Forward {
    pub args: Vec<Bytes>,
}

#[async_trait]
impl Executable for Forward {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame {
        match router.call_destination(self.args).await {
            Ok(reply) => reply,
            Err(err) => err.to_frame(),
        }
    }
}
