use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::{self, Frame, Limits};

/// A client connection. Frames are decoded lazily from the socket; data belonging to a frame
/// that has not fully arrived stays buffered until the next read.
pub struct Connection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream, client_address: SocketAddr, limits: Limits) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            client_address,
            framed: Framed::new(stream, FrameCodec::new(limits)),
        }
    }

    /// Reads a single frame. Returns `None` when the client closed the socket between frames;
    /// a close in the middle of a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        self.framed.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), frame::Error> {
        self.framed.send(frame).await
    }
}
