use async_trait::async_trait;

use crate::backend::Backend;
use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::router::Router;

/// Ask the proxy to close the connection once the reply is written. Never forwarded: the pooled
/// backend connection would be the one to close.
///
/// Ref: <https://redis.io/docs/latest/commands/quit/>
#[derive(Debug, PartialEq)]
pub struct Quit;

#[async_trait]
impl Executable for Quit {
    async fn exec<B: Backend>(self, _router: &Router<B>) -> Frame {
        Frame::Simple("OK".to_string())
    }
}
