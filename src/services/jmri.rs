//! Text protocol listener for JMRI and other DCC++ style clients.
//!
//! Every accepted connection gets its own [`CommandDispatcher`] over the
//! shared [`CommandRegistry`]. Replies go back to the sender only; lines
//! pushed through [`BroadcastStatus`] go to every connected client.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::protocol::{CommandDispatcher, CommandRegistry};
use crate::traits::StatusSink;

const READ_BUFFER: usize = 256;

/// [`StatusSink`] backed by a tokio broadcast channel.
#[derive(Clone, Debug)]
pub struct BroadcastStatus {
    tx: broadcast::Sender<String>,
}

impl BroadcastStatus {
    /// Create a channel holding up to `capacity` undelivered lines per client.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for lines broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastStatus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl StatusSink for BroadcastStatus {
    fn broadcast(&self, line: &str) {
        // No receivers just means no clients are connected.
        let _ = self.tx.send(line.to_string());
    }
}

/// Accepts text protocol clients.
pub struct JmriListener {
    listener: TcpListener,
    commands: Arc<CommandRegistry>,
    status: BroadcastStatus,
}

impl JmriListener {
    /// Bind to `addr`.
    pub async fn bind(
        addr: &str,
        commands: Arc<CommandRegistry>,
        status: BroadcastStatus,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "text protocol listener bound");
        Ok(Self {
            listener,
            commands,
            status,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    let commands = Arc::clone(&self.commands);
                    let updates = self.status.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, commands, updates).await {
                            debug!(%peer, error = %e, "client error");
                        }
                        info!(%peer, "client disconnected");
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    commands: Arc<CommandRegistry>,
    mut updates: broadcast::Receiver<String>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut dispatcher = CommandDispatcher::new(commands);
    let mut buf = [0u8; READ_BUFFER];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    if !dispatcher.pending().is_empty() {
                        debug!(
                            dropped = %String::from_utf8_lossy(dispatcher.pending()),
                            "client closed mid-frame"
                        );
                    }
                    return Ok(());
                }
                let mut reply = String::new();
                for response in dispatcher.feed(&buf[..n]) {
                    if !response.is_empty() {
                        reply.push_str(&response.to_string());
                        reply.push('\n');
                    }
                }
                if !reply.is_empty() {
                    writer.write_all(reply.as_bytes()).await?;
                }
            }
            update = updates.recv() => match update {
                Ok(line) => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client fell behind on status updates");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}
