use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::Pool;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::router::Router;
use crate::Error;

/// A bound proxy that has not started accepting yet. Binding and serving are split so the
/// caller learns the listening address (or the bind failure) before any client is served.
pub struct Server {
    listener: TcpListener,
    router: Arc<Router<Pool>>,
    config: Arc<Config>,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Server, Error> {
        config.validate()?;

        let destination = Pool::new("destination", &config.destination, config.limits);
        let source = config
            .source
            .as_ref()
            .map(|source| Pool::new("source", source, config.limits));

        match &source {
            Some(source) => info!("Migrating from {} to {}", source.addr(), destination.addr()),
            None => info!("No source configured, proxying to {}", destination.addr()),
        }

        let router = Router::new(destination, source, config.policy());
        let listener = TcpListener::bind(&config.listen).await?;

        info!("Remiro listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            router: Arc::new(router),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `shutdown` completes. Then stops accepting, tells every connection
    /// to finish its current command and close, waits for them up to the shutdown timeout, and
    /// finally closes the backend pools.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Server {
            listener,
            router,
            config,
        } = self;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }

                res = listener.accept() => match res {
                    Ok((socket, client_address)) => {
                        info!("Accepted connection from {:?}", client_address);

                        let router = router.clone();
                        let config = config.clone();
                        let shutdown_rx = shutdown_tx.subscribe();

                        handlers.spawn(async move {
                            let res = handle_connection(
                                socket,
                                client_address,
                                router,
                                config,
                                shutdown_rx,
                            )
                            .await;
                            if let Err(e) = res {
                                warn!("Connection from {} terminated: {}", client_address, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },

                Some(res) = handlers.join_next() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("A connection handler panicked: {e:?}");
                        }
                    }
                },
            }
        }

        drop(listener);
        // Nobody may be subscribed; that is fine.
        let _ = shutdown_tx.send(());

        let drained = timeout(config.shutdown_timeout, async {
            while let Some(res) = handlers.join_next().await {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!("A connection handler panicked: {e:?}");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout elapsed, aborting {} connections", handlers.len());
            handlers.shutdown().await;
        }
        info!("All client connections closed");

        router.destination().close();
        if let Some(source) = router.source() {
            source.close();
        }

        Ok(())
    }
}

/// Runs the proxy until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let server = Server::bind(config).await?;
    server.serve(shutdown_signal()).await
}

/// Runs the proxy until `shutdown` completes, sending the bound address on `ready` as soon as
/// the listener is up.
pub async fn run_with_signal(
    config: Config,
    ready: oneshot::Sender<SocketAddr>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let server = Server::bind(config).await?;

    // The caller may have stopped waiting; serving goes on regardless.
    let _ = ready.send(server.local_addr()?);

    server.serve(shutdown).await
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to register SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("SIGINT received, initiating graceful shutdown"),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown"),
    }
}

#[instrument(
    name = "connection",
    skip(stream, client_address, router, config, shutdown),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    router: Arc<Router<Pool>>,
    config: Arc<Config>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream, client_address, config.limits);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string().as_str())
        .record("client_address", client_address.to_string().as_str());

    loop {
        // Shutdown is only observed between commands, so an in-flight command always gets its
        // reply.
        let frame = tokio::select! {
            res = conn.read_frame() => res,
            _ = shutdown.recv() => {
                debug!("Server shutting down");
                break;
            }
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_protocol() => {
                warn!("Closing connection: {}", e);
                let reply = Frame::Error(format!("ERR {}", e));
                let _ = timeout(config.command_timeout, conn.write_frame(reply)).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Received frame from client: {}", frame);
        let deadline = Instant::now() + config.command_timeout;

        let command = match Command::try_from(frame) {
            Ok(command) => command,
            Err(e) if e.is_protocol() => {
                warn!("Closing connection: {:?}", e);
                let _ = timeout_at(deadline, conn.write_frame(e.to_frame())).await;
                return Ok(());
            }
            Err(e) => {
                timeout_at(deadline, conn.write_frame(e.to_frame()))
                    .await
                    .map_err(|_| "timed out writing reply")??;
                continue;
            }
        };

        let quit = matches!(command, Command::Quit(_));

        let reply = match timeout_at(deadline, router.route(command)).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!("Command did not complete in {:?}", config.command_timeout);
                Frame::error("ERR command timed out")
            }
        };

        debug!("Sending reply to client: {}", reply);
        timeout_at(deadline, conn.write_frame(reply))
            .await
            .map_err(|_| "timed out writing reply")??;

        if quit {
            break;
        }
    }

    info!("Connection closed");
    Ok(())
}
