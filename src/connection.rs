//! Connection adapters
//!
//! A client actor talks to its physical connection through two halves:
//! a [`FrameReader`] driven by the inbound loop and a [`FrameWriter`]
//! driven by the outbound loop. Two implementations are provided:
//! - WebSocket over any async byte stream (tokio-tungstenite)
//! - An in-process channel pair, for embedding and tests

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::TransportError;
use crate::message::Event;

/// One frame written by the outbound loop
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Encoded event envelope
    Text(String),
    /// Liveness probe
    Ping,
    /// End of stream
    Close,
}

/// Read half of a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next data frame
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Release the connection. Safe to call after a close frame was written.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Split a WebSocket stream into reader and writer halves
pub fn split_websocket<S>(ws: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = ws.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

/// WebSocket read half
pub struct WsReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(_))) => {
                    debug!("Peer sent close frame");
                    return Ok(None);
                }
                // Pong replies are queued by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// WebSocket write half
pub struct WsWriter<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let msg = match frame {
            OutboundFrame::Text(text) => Message::Text(text.into()),
            OutboundFrame::Ping => Message::Ping(Default::default()),
            OutboundFrame::Close => Message::Close(None),
        };
        self.inner.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create an in-process connection
///
/// The reader and writer go to the client actor; the [`MemoryPeer`]
/// plays the remote side.
pub fn memory_connection(capacity: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        MemoryReader { rx: in_rx },
        MemoryWriter { tx: Some(out_tx) },
        MemoryPeer {
            to_server: Some(in_tx),
            from_server: out_rx,
        },
    )
}

pub struct MemoryReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

pub struct MemoryWriter {
    tx: Option<mpsc::Sender<OutboundFrame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// Remote side of an in-process connection
pub struct MemoryPeer {
    to_server: Option<mpsc::Sender<Vec<u8>>>,
    from_server: mpsc::Receiver<OutboundFrame>,
}

impl MemoryPeer {
    /// Send one inbound frame
    pub async fn send(&self, frame: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        let tx = self.to_server.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.into()).await.map_err(|_| TransportError::Closed)
    }

    /// Close the inbound direction; the actor's next read sees EOF
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Next frame written by the server, `None` once the writer is gone
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.from_server.recv().await
    }

    /// Next event written by the server, skipping pings
    ///
    /// Returns `None` on a close frame or when the writer is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.from_server.recv().await? {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).ok(),
                OutboundFrame::Ping => continue,
                OutboundFrame::Close => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventKind;

    #[tokio::test]
    async fn test_memory_connection_roundtrip() {
        let (mut reader, mut writer, mut peer) = memory_connection(8);

        peer.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), Some(b"hello".to_vec()));

        writer.write_frame(OutboundFrame::Ping).await.unwrap();
        writer
            .write_frame(OutboundFrame::Text(
                r#"{"type":"user_left_room","payload":null}"#.to_string(),
            ))
            .await
            .unwrap();
        let event = peer.next_event().await.unwrap();
        assert_eq!(event.kind(), EventKind::UserLeftRoom);

        peer.disconnect();
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_writer_fails_after_close() {
        let (_reader, mut writer, mut peer) = memory_connection(8);
        writer.close().await.unwrap();
        assert!(matches!(
            writer.write_frame(OutboundFrame::Ping).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(peer.recv().await, None);
    }
}
