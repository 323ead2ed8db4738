//! Connection contract between the client and its transport.
//!
//! A [`Connection`] is split once into a [`FrameWriter`] (shared by every
//! sender under a lock) and a [`FrameReader`] (owned by the dispatcher
//! alone). [`memory_pair`] provides an in-process connection with a
//! scriptable peer.

use crate::error::{Result, TvError};
use crate::message::Message;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Write side of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Transmit one frame atomically.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the write side. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Read side of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Wait for the next frame. An error is terminal.
    async fn receive(&mut self) -> Result<Frame>;
}

/// An established full-duplex framed transport.
pub trait Connection: Send + 'static {
    type Writer: FrameWriter;
    type Reader: FrameReader;

    fn split(self) -> (Self::Writer, Self::Reader);
}

/// Create an in-process connection and the peer that drives it.
pub fn memory_pair() -> (MemoryConnection, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            writer: MemoryWriter {
                tx: Some(outbound_tx),
            },
            reader: MemoryReader { rx: inbound_rx },
        },
        MemoryPeer {
            received: outbound_rx,
            push: Some(inbound_tx),
        },
    )
}

/// Client end of [`memory_pair`].
#[derive(Debug)]
pub struct MemoryConnection {
    writer: MemoryWriter,
    reader: MemoryReader,
}

impl Connection for MemoryConnection {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    fn split(self) -> (MemoryWriter, MemoryReader) {
        (self.writer, self.reader)
    }
}

#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TvError::ConnectionClosed)?;
        tx.send(frame)
            .map_err(|_| TvError::transport("peer stopped reading"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn receive(&mut self) -> Result<Frame> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| TvError::transport("connection closed by peer"))
    }
}

/// Scripted far end of a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryPeer {
    received: mpsc::UnboundedReceiver<Frame>,
    push: Option<mpsc::UnboundedSender<Frame>>,
}

impl MemoryPeer {
    /// Wait for the next frame the client wrote. `None` once the client
    /// closed its write side.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.received.recv().await
    }

    /// Wait for the next text frame the client wrote and decode it.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            if let Frame::Text(text) = self.next_frame().await? {
                return serde_json::from_str(&text).ok();
            }
        }
    }

    /// Take an already-written message without waiting.
    pub fn try_next_message(&mut self) -> Option<Message> {
        match self.received.try_recv().ok()? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Binary(_) => None,
        }
    }

    /// Send a frame to the client. Returns false after [`disconnect`](Self::disconnect).
    pub fn push(&self, frame: Frame) -> bool {
        self.push
            .as_ref()
            .map_or(false, |tx| tx.send(frame).is_ok())
    }

    /// Send a JSON value to the client as a text frame.
    pub fn push_json(&self, value: serde_json::Value) -> bool {
        self.push(Frame::Text(value.to_string()))
    }

    /// Break the transport: the client's reader fails once the frames
    /// already pushed have been read.
    pub fn disconnect(&mut self) {
        self.push = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (conn, mut peer) = memory_pair();
        let (mut writer, mut reader) = conn.split();

        writer
            .send(Frame::Text(r#"{"type":"request","id":"a"}"#.into()))
            .await
            .unwrap();
        let msg = peer.next_message().await.unwrap();
        assert_eq!(msg.kind, MessageType::Request);

        assert!(peer.push(Frame::Binary(vec![1, 2, 3])));
        assert_eq!(reader.receive().await.unwrap(), Frame::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_disconnect_fails_reader() {
        let (conn, mut peer) = memory_pair();
        let (_writer, mut reader) = conn.split();

        peer.push_json(serde_json::json!({"type": "response"}));
        peer.disconnect();

        assert!(reader.receive().await.is_ok());
        assert!(matches!(
            reader.receive().await,
            Err(TvError::Transport { .. })
        ));
        assert!(!peer.push_json(serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_closed_writer() {
        let (conn, mut peer) = memory_pair();
        let (mut writer, _reader) = conn.split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.send(Frame::Text("x".into())).await,
            Err(TvError::ConnectionClosed)
        ));
        assert!(peer.next_frame().await.is_none());
    }
}
