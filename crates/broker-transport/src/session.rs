//! TCP broker session.
//!
//! A connected session owns two tasks: a writer draining an unbounded frame
//! channel onto the socket, and a reader routing `ack`/`nack` frames to the
//! sink registered for each correlation id and attempt. Losing the connection
//! fails every pending send through its sink.

use crate::{BrokerError, BrokerFrame, BrokerResult, ClientFrame};
use parking_lot::Mutex;
use publish_pipeline::{
    AckSink, Acknowledgment, CorrelationId, OutboundMessage, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Failure detail reported for sends pending when the connection drops.
pub const CONNECTION_LOST: &str = "connection lost";
/// Failure detail reported for sends pending when the session is closed.
pub const SESSION_CLOSED: &str = "session closed";

/// Connection settings for a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub vpn: String,
    pub password: Option<String>,
    /// Bound on the TCP connect and on the handshake reply.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, vpn: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            vpn: vpn.into(),
            password: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// `host:port` for connecting. IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A publish frame on the wire: correlation id and attempt.
type SendKey = (CorrelationId, u32);

struct LinkState {
    open: bool,
    pending: HashMap<SendKey, AckSink>,
}

/// Pending sends and connection liveness, shared with the I/O tasks.
struct Link {
    state: Mutex<LinkState>,
}

impl Link {
    fn new() -> Self {
        Self {
            state: Mutex::new(LinkState {
                open: true,
                pending: HashMap::new(),
            }),
        }
    }

    fn resolve(&self, id: CorrelationId, attempt: u32, ack: Acknowledgment) {
        let sink = self.state.lock().pending.remove(&(id, attempt));
        match sink {
            Some(sink) => sink.on_ack(id, ack),
            None => debug!(correlation_id = %id, attempt, "Acknowledgment for unknown message"),
        }
    }

    /// Mark the link closed and fail everything still pending.
    fn fail_pending(&self, reason: &str) {
        let pending = {
            let mut state = self.state.lock();
            state.open = false;
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            warn!(count = pending.len(), reason, "Failing pending sends");
        }
        for ((id, _), sink) in pending {
            sink.on_ack(id, Acknowledgment::Failed(reason.to_string()));
        }
    }
}

/// A connected broker session. Implements [`Transport`].
pub struct BrokerSession {
    address: String,
    frames_tx: mpsc::UnboundedSender<ClientFrame>,
    link: Arc<Link>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BrokerSession {
    /// Connect and complete the handshake.
    ///
    /// Any failure here is fatal to the caller; nothing is retried.
    pub async fn connect(config: &SessionConfig) -> BrokerResult<Self> {
        let address = config.address();
        info!(address = %address, username = %config.username, vpn = %config.vpn, "Connecting to broker");

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| BrokerError::Timeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let connect = ClientFrame::Connect {
            username: config.username.clone(),
            vpn: config.vpn.clone(),
            password: config.password.clone(),
        };
        write_frame(&mut writer, &connect).await?;

        let mut line = String::new();
        let bytes_read = timeout(config.connect_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| BrokerError::Timeout(config.connect_timeout))??;
        if bytes_read == 0 {
            return Err(BrokerError::ConnectionClosed);
        }

        match BrokerFrame::from_json(line.trim())? {
            BrokerFrame::Connected => {}
            BrokerFrame::Refused { reason } => return Err(BrokerError::Refused(reason)),
            other => {
                return Err(BrokerError::Protocol(format!(
                    "Unexpected frame during handshake: {:?}",
                    other
                )))
            }
        }

        let link = Arc::new(Link::new());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(run_writer(
            writer,
            frames_rx,
            link.clone(),
            shutdown_tx.subscribe(),
        ));
        tokio::spawn(run_reader(
            reader,
            link.clone(),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        info!(address = %address, "Broker session established");
        Ok(Self {
            address,
            frames_tx,
            link,
            shutdown_tx,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// False once the connection dropped or the session was closed.
    pub fn is_connected(&self) -> bool {
        self.link.state.lock().open
    }

    /// Sends handed to the broker and not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.link.state.lock().pending.len()
    }

    /// Stop the I/O tasks and fail anything still pending.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        self.link.fail_pending(SESSION_CLOSED);
        debug!(address = %self.address, "Broker session closed");
    }
}

impl Drop for BrokerSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for BrokerSession {
    fn send(&self, message: OutboundMessage, sink: AckSink) -> Result<(), TransportError> {
        let key = (message.correlation_id, message.attempt);
        {
            let mut state = self.link.state.lock();
            if !state.open {
                return Err(TransportError::SendRejected(SESSION_CLOSED.to_string()));
            }
            state.pending.insert(key, sink);
        }

        if self.frames_tx.send(ClientFrame::publish(&message)).is_err() {
            self.link.state.lock().pending.remove(&key);
            return Err(TransportError::SendRejected("writer stopped".to_string()));
        }
        Ok(())
    }

    fn forget(&self, correlation_id: CorrelationId, attempt: u32) {
        if self
            .link
            .state
            .lock()
            .pending
            .remove(&(correlation_id, attempt))
            .is_some()
        {
            debug!(correlation_id = %correlation_id, attempt, "Stopped tracking send");
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &ClientFrame) -> BrokerResult<()> {
    let json = frame.to_json()?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut frames_rx: mpsc::UnboundedReceiver<ClientFrame>,
    link: Arc<Link>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(error = %e, "Failed to write frame");
                    link.fail_pending(CONNECTION_LOST);
                    break;
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    let _ = writer.shutdown().await;
    debug!("Broker writer stopped");
}

async fn run_reader(
    mut reader: BufReader<OwnedReadHalf>,
    link: Arc<Link>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut line = String::new();
    let reason = loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = shutdown_rx.recv() => break SESSION_CLOSED,
        };
        match read {
            Ok(0) => break CONNECTION_LOST,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Broker read failed");
                break CONNECTION_LOST;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match BrokerFrame::from_json(trimmed) {
            Ok(BrokerFrame::Ack { id, attempt }) => {
                link.resolve(id, attempt, Acknowledgment::Delivered)
            }
            Ok(BrokerFrame::Nack { id, attempt, error }) => {
                link.resolve(id, attempt, Acknowledgment::Failed(error))
            }
            Ok(frame) => warn!(frame = ?frame, "Unexpected frame after handshake"),
            Err(e) => warn!(error = %e, "Failed to parse broker frame"),
        }
    };

    if reason == CONNECTION_LOST {
        warn!("Broker connection lost");
    }
    link.fail_pending(reason);
    let _ = shutdown_tx.send(());
}
