use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::WireCodec;
use crate::error::LumenError;
use crate::packet::WireMessage;

/// Outbound queue depth per connection.
const CHANNEL_DEPTH: usize = 64;

pub type ConnectionSender = mpsc::Sender<WireMessage>;

/// One framed TCP peer. Reading and writing run on background tasks; the
/// handle talks to them over mpsc channels.
#[derive(Debug)]
pub struct Connection {
    tx: ConnectionSender,
    rx: mpsc::Receiver<WireMessage>,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (mut net_writer, mut net_reader) = Framed::new(stream, WireCodec::new()).split();

        let (user_tx, mut network_rx) = mpsc::channel::<WireMessage>(CHANNEL_DEPTH);
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            while let Some(msg) = network_rx.recv().await {
                if let Err(e) = net_writer.send(msg).await {
                    warn!(?peer, error = %e, "network write failed");
                    break;
                }
            }
            let _ = net_writer.close().await;
            debug!(?peer, "writer finished");
        });

        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(msg) => {
                        if network_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Framing faults are absorbed by the codec; this is IO.
                        warn!(?peer, error = %e, "network read failed");
                        break;
                    }
                }
            }
            debug!(?peer, "reader finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
            peer,
        }
    }

    pub async fn connect(info: &ConnectionInfo) -> Result<Self, LumenError> {
        let stream = TcpStream::connect(info.address()).await?;
        Ok(Self::new(stream))
    }

    pub async fn send(&self, msg: WireMessage) -> Result<(), LumenError> {
        self.tx.send(msg).await.map_err(LumenError::from)
    }

    /// `None` once the peer closed or the socket failed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Separate the outbound sender from the inbound stream so they can be
    /// driven by different tasks.
    pub fn split(self) -> (ConnectionSender, mpsc::Receiver<WireMessage>) {
        (self.tx, self.rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
