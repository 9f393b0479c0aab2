//! TCP listener for the control protocol.
//!
//! Every connection is greeted with the banner line and then served on its own
//! task until the client sends `quit`, disconnects, or the daemon shuts down.

use crate::config::ControlConfig;
use crate::core::ControlActions;
use crate::error::AppResult;
use crate::network::protocol::{self, Reply};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest control line accepted, newline included. Longer lines are discarded
/// whole.
pub const MAX_LINE: u64 = 1024;

/// Accepts control connections and serves each on its own task.
pub struct ControlServer {
    listener: TcpListener,
    actions: Arc<dyn ControlActions>,
    banner: String,
    shutdown: CancellationToken,
}

impl ControlServer {
    /// Binds `addr`; every client is greeted with `banner` on its own line.
    pub async fn bind(
        addr: &str,
        banner: &str,
        actions: Arc<dyn ControlActions>,
        shutdown: CancellationToken,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Control server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            actions,
            banner: format!("{}\n", banner.trim_end()),
            shutdown,
        })
    }

    /// Bound address, useful when binding port 0.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the shutdown token fires, then aborts lingering clients.
    pub async fn run(self) {
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let actions = self.actions.clone();
                            let banner = self.banner.clone();
                            let shutdown = self.shutdown.clone();

                            clients.spawn(async move {
                                if let Err(e) =
                                    Self::handle_client(socket, addr, actions, banner, shutdown).await
                                {
                                    warn!("Client {} error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }

                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        clients.shutdown().await;
        info!("Control server stopped");
    }

    async fn handle_client(
        socket: TcpStream,
        addr: SocketAddr,
        actions: Arc<dyn ControlActions>,
        banner: String,
        shutdown: CancellationToken,
    ) -> AppResult<()> {
        info!("Client connected: {}", addr);

        let (read_half, mut write_half) = socket.into_split();
        write_half.write_all(banner.as_bytes()).await?;

        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::with_capacity(128);

        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE);
            let n = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = limited.read_until(b'\n', &mut buf) => read?,
            };
            if n == 0 {
                break;
            }

            if n as u64 == MAX_LINE && buf.last() != Some(&b'\n') {
                let complete = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    skipped = discard_line(&mut reader) => skipped?,
                };
                warn!(client = %addr, "Discarding control line longer than {} bytes", MAX_LINE);
                write_half.write_all(protocol::RESP_LINE_TOO_LONG.as_bytes()).await?;
                if !complete {
                    break;
                }
                continue;
            }

            let line: String = buf
                .iter()
                .filter(|b| b.is_ascii())
                .map(|&b| char::from(b))
                .collect();
            debug!(client = %addr, command = line.trim(), "Control command");

            match protocol::handle(&line, actions.as_ref()).await {
                Reply::Respond(text) => write_half.write_all(text.as_bytes()).await?,
                Reply::Close => break,
            }
        }

        info!("Client {} disconnected", addr);
        Ok(())
    }
}

/// Consumes input through the next newline. `false` when the peer closed first.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(true);
        }
        let len = available.len();
        reader.consume(len);
    }
}

/// Starts the control server when `net_port > 0`; otherwise the surface is off.
pub async fn spawn_control_server(
    config: &ControlConfig,
    banner: &str,
    actions: Arc<dyn ControlActions>,
    shutdown: CancellationToken,
) -> AppResult<Option<JoinHandle<()>>> {
    if config.net_port == 0 {
        info!("Control server disabled (net_port = 0)");
        return Ok(None);
    }
    let addr = format!("{}:{}", config.bind_address, config.net_port);
    let server = ControlServer::bind(&addr, banner, actions, shutdown).await?;
    Ok(Some(tokio::spawn(server.run())))
}
