use async_trait::async_trait;

use crate::backend::Backend;
use crate::frame::Frame;
use crate::router::Router;

/// Runs a parsed command against the backends. Every failure is turned into the single reply
/// the client receives for the command.
#[async_trait]
pub trait Executable {
    async fn exec<B: Backend>(self, router: &Router<B>) -> Frame;
}
