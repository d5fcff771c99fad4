use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::backend::{Backend, BackendError};
use crate::codec::FrameCodec;
use crate::config::{BackendConfig, PoolConfig};
use crate::frame::{Frame, Limits};

type Transport = Framed<TcpStream, FrameCodec>;

/// A bounded set of framed connections to a single backend. At most `max` connections exist at
/// any time, idle or checked out; the pool is cheap to clone and every clone shares the same
/// connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Shared>,
}

struct Shared {
    name: &'static str,
    addr: String,
    config: PoolConfig,
    limits: Limits,
    idle: Mutex<VecDeque<Idle>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

struct Idle {
    transport: Transport,
    since: Instant,
}

impl Pool {
    pub fn new(name: &'static str, backend: &BackendConfig, limits: Limits) -> Pool {
        Pool {
            inner: Arc::new(Shared {
                name,
                addr: backend.addr.clone(),
                config: backend.pool,
                limits,
                idle: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(backend.pool.max)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Hands out an idle connection, or dials a new one while under the size limit. When the
    /// pool is at its limit this waits up to the checkout timeout for a connection to come back.
    pub async fn checkout(&self) -> Result<PooledConnection, BackendError> {
        if self.is_closed() {
            return Err(BackendError::PoolClosed);
        }

        let permits = self.inner.permits.clone();
        let checkout_timeout = self.inner.config.checkout_timeout;
        let permit = match timeout(checkout_timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is only ever closed by `Pool::close`.
            Ok(Err(_)) => return Err(BackendError::PoolClosed),
            Err(_) => {
                debug!(backend = self.inner.name, "no connection available in time");
                return Err(BackendError::PoolExhausted);
            }
        };

        let transport = match self.take_idle() {
            Some(transport) => transport,
            None => self.dial().await?,
        };

        Ok(PooledConnection {
            transport: Some(transport),
            poisoned: false,
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Drops every idle connection and fails all current and future checkouts. Connections that
    /// are checked out are closed when their holder lets go of them.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.permits.close();
        let drained = {
            let mut idle = self.idle();
            let drained = idle.len();
            idle.clear();
            drained
        };

        info!(
            backend = self.inner.name,
            "Closed pool, dropped {} idle connections", drained
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_len(&self) -> usize {
        self.idle().len()
    }

    fn idle(&self) -> MutexGuard<'_, VecDeque<Idle>> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_idle(&self) -> Option<Transport> {
        let idle_timeout = self.inner.config.idle_timeout;
        let mut idle = self.idle();

        let before = idle.len();
        idle.retain(|entry| entry.since.elapsed() < idle_timeout);
        if idle.len() < before {
            debug!(
                backend = self.inner.name,
                "Discarded {} stale idle connections",
                before - idle.len()
            );
        }

        // Most recently returned first, so the rest of the set can go stale and get reaped.
        idle.pop_back().map(|entry| entry.transport)
    }

    fn put_back(&self, transport: Transport) {
        // Checked under the lock, so `close` either sees this entry or it is never added.
        let mut idle = self.idle();
        if self.is_closed() {
            return;
        }

        idle.push_back(Idle {
            transport,
            since: Instant::now(),
        });
    }

    async fn dial(&self) -> Result<Transport, BackendError> {
        let addr = self.inner.addr.as_str();
        let stream = timeout(self.inner.config.call_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BackendError::Timeout)??;
        stream.set_nodelay(true)?;

        debug!(backend = self.inner.name, addr, "Opened backend connection");

        Ok(Framed::new(stream, FrameCodec::new(self.inner.limits)))
    }
}

#[async_trait]
impl Backend for Pool {
    async fn call(&self, args: Vec<Bytes>) -> Result<Frame, BackendError> {
        let mut conn = self.checkout().await?;
        let reply = conn.call(args).await;
        conn.release();
        reply
    }
}

/// A connection checked out of a [`Pool`]. It is owned exclusively by its holder and goes back
/// to the pool when dropped, unless a failed call poisoned it, in which case it is closed.
pub struct PooledConnection {
    transport: Option<Transport>,
    poisoned: bool,
    pool: Pool,
    // Released after `drop` has put the transport back, so a waiter finds it idle.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// One request/response round trip, bounded by the pool's call timeout.
    pub async fn call(&mut self, args: Vec<Bytes>) -> Result<Frame, BackendError> {
        let transport = match self.transport.as_mut() {
            Some(transport) if !self.poisoned => transport,
            _ => return Err(BackendError::ConnectionClosed),
        };

        // Stays set if the call fails or its future is dropped midway: the stream may then hold
        // a partial request or an unread reply.
        self.poisoned = true;

        let request = Frame::Array(args.into_iter().map(Frame::Bulk).collect());
        let call_timeout = self.pool.inner.config.call_timeout;
        let reply = timeout(call_timeout, round_trip(transport, request))
            .await
            .map_err(|_| BackendError::Timeout)??;

        self.poisoned = false;
        Ok(reply)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn release(self) {
        drop(self)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            if self.poisoned {
                debug!(backend = self.pool.inner.name, "Closing poisoned connection");
            } else {
                self.pool.put_back(transport);
            }
        }
    }
}

async fn round_trip(transport: &mut Transport, request: Frame) -> Result<Frame, BackendError> {
    transport.send(request).await?;

    match transport.next().await {
        Some(reply) => Ok(reply?),
        None => Err(BackendError::ConnectionClosed),
    }
}
