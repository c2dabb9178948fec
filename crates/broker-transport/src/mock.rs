//! In-process broker for tests.
//!
//! Listens on an ephemeral localhost port, answers the handshake as told and
//! replies to each publish frame with whatever the reply function decides.

use crate::{BrokerFrame, ClientFrame};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// How the mock answers a `connect` frame.
#[derive(Debug, Clone)]
pub enum Handshake {
    Accept,
    Refuse(String),
    /// Never answer.
    Silent,
}

/// How the mock answers a `publish` frame.
#[derive(Debug, Clone)]
pub enum Reply {
    Ack,
    Nack(String),
    /// Leave the message unacknowledged.
    Ignore,
    /// Drop the connection without answering.
    Disconnect,
}

/// A scripted broker bound to `127.0.0.1`.
pub struct MockBroker {
    addr: SocketAddr,
    frames_rx: mpsc::UnboundedReceiver<ClientFrame>,
    task: JoinHandle<()>,
}

impl MockBroker {
    /// Bind and start serving connections one at a time.
    pub async fn start<F>(handshake: Handshake, reply: F) -> io::Result<Self>
    where
        F: FnMut(&ClientFrame) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut reply = reply;
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(peer = %peer, "Mock broker accepted connection");
                if let Err(e) = serve(stream, &handshake, &mut reply, &frames_tx).await {
                    debug!(error = %e, "Mock broker connection ended");
                }
            }
        });

        Ok(Self {
            addr,
            frames_rx,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next frame the broker received, in arrival order.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        self.frames_rx.recv().await
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<F>(
    stream: TcpStream,
    handshake: &Handshake,
    reply: &mut F,
    frames_tx: &mpsc::UnboundedSender<ClientFrame>,
) -> io::Result<()>
where
    F: FnMut(&ClientFrame) -> Reply,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let frame = ClientFrame::from_json(trimmed)?;
        let _ = frames_tx.send(frame.clone());

        match &frame {
            ClientFrame::Connect { .. } => match handshake {
                Handshake::Accept => write_frame(&mut writer, &BrokerFrame::Connected).await?,
                Handshake::Refuse(reason) => {
                    write_frame(
                        &mut writer,
                        &BrokerFrame::Refused {
                            reason: reason.clone(),
                        },
                    )
                    .await?;
                    return Ok(());
                }
                Handshake::Silent => {}
            },
            ClientFrame::Publish { id, attempt, .. } => match reply(&frame) {
                Reply::Ack => {
                    let ack = BrokerFrame::Ack {
                        id: *id,
                        attempt: *attempt,
                    };
                    write_frame(&mut writer, &ack).await?
                }
                Reply::Nack(error) => {
                    let nack = BrokerFrame::Nack {
                        id: *id,
                        attempt: *attempt,
                        error,
                    };
                    write_frame(&mut writer, &nack).await?
                }
                Reply::Ignore => {}
                Reply::Disconnect => return Ok(()),
            },
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &BrokerFrame) -> io::Result<()> {
    let json = frame.to_json()?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
