//! Transport seam between the client and the bus.
//!
//! The core never talks to an OS bus directly; it sends and receives
//! `serde_json::Value` frames through the traits defined here. A concrete
//! binding only has to reproduce the wire boundary described in
//! `bolt-protocol`: method calls out, replies and signals in.
//!
//! [`PipeTransport`] is the stream binding: 4-byte big-endian length prefix
//! followed by a JSON payload, over any `AsyncWrite`/`AsyncRead` pair (a unix
//! socket, a child process pipe, an in-memory duplex in tests).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Maximum frame size (16 MB).
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Outbound half of a transport.
pub trait Transport: Send {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Inbound half of a transport.
///
/// `run` pumps frames from the peer into the message channel until the
/// connection closes; it is driven by [`Connection::run`].
///
/// [`Connection::run`]: crate::connection::Connection::run
pub trait TransportReceiver: Send {
    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// The pieces a [`Connection`](crate::connection::Connection) is built from.
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Length-prefixed JSON transport over a byte stream.
pub struct PipeTransport;

impl PipeTransport {
    pub fn new<W, R>(writer: W, reader: R) -> TransportParts
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        TransportParts {
            sender: Box::new(PipeSender { writer }),
            receiver: Box::new(PipeReceiver { reader, message_tx }),
            message_rx,
        }
    }
}

struct PipeSender<W> {
    writer: W,
}

impl<W> Transport for PipeSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&message)?;
            write_frame(&mut self.writer, &payload).await?;
            Ok(())
        })
    }
}

struct PipeReceiver<R> {
    reader: R,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            loop {
                let payload = match read_frame(&mut self.reader).await {
                    Ok(payload) => payload,
                    // Clean EOF between frames means the peer hung up.
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                };

                let message: Value = match serde_json::from_slice(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!("dropping unparsable frame: {e}");
                        continue;
                    }
                };

                if self.message_tx.send(message).is_err() {
                    return Ok(());
                }
            }
        })
    }
}

/// Read one length-delimited frame.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-delimited frame.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
