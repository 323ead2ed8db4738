//! Pointer input socket.
//!
//! A second websocket, whose address the main API hands out, accepts
//! line-oriented text commands for buttons, pointer motion and clicks:
//!
//! ```text
//! type:button
//! name:HOME
//!
//! ```
//!
//! Nothing useful comes back on it, but it must still be read so the
//! transport keeps flowing.

use crate::client::TvClient;
use crate::config::ProtocolConfig;
use crate::connection::{Connection, Frame, FrameReader, FrameWriter};
use crate::error::{Result, TvError};
use crate::ws::Dialer;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Write handle for the pointer input socket.
pub struct PointerSocket {
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
}

impl PointerSocket {
    /// Split a connection, spawn a task that discards inbound frames, and
    /// return the write handle plus that task. The task yields the transport
    /// error that ended it.
    pub fn start<C: Connection>(connection: C) -> (Self, JoinHandle<TvError>) {
        let (writer, reader) = connection.split();
        let drain = tokio::spawn(drain(reader));
        (
            Self {
                writer: Mutex::new(Some(Box::new(writer))),
            },
            drain,
        )
    }

    /// Send a raw input command, e.g. `input("button", "HOME")`.
    pub async fn input(&self, kind: &str, name: &str) -> Result<()> {
        self.write(format!("type:{}\nname:{}\n\n", kind, name)).await
    }

    /// Press a remote-control button such as `UP`, `HOME`, `BACK` or `5`.
    pub async fn button(&self, name: &str) -> Result<()> {
        self.input("button", name).await
    }

    /// Move the pointer by a relative offset.
    pub async fn move_by(&self, dx: i32, dy: i32) -> Result<()> {
        self.write(format!("type:move\ndx:{}\ndy:{}\ndown:0\n\n", dx, dy))
            .await
    }

    pub async fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.write(format!("type:scroll\ndx:{}\ndy:{}\ndown:0\n\n", dx, dy))
            .await
    }

    pub async fn click(&self) -> Result<()> {
        self.write("type:click\n\n".to_string()).await
    }

    /// Close the socket. Further commands fail with `ConnectionClosed`.
    pub async fn close(&self) -> Result<()> {
        match self.writer.lock().await.take() {
            Some(mut writer) => writer.close().await,
            None => Ok(()),
        }
    }

    async fn write(&self, command: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TvError::ConnectionClosed)?;
        debug!("pointer write: {:?}", command);
        writer.send(Frame::Text(command)).await
    }
}

async fn drain<R: FrameReader>(mut reader: R) -> TvError {
    loop {
        match reader.receive().await {
            Ok(_) => continue,
            Err(err) => {
                debug!("Pointer socket closed: {}", err);
                return err;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointerInputSocket {
    socket_path: String,
}

impl TvClient {
    /// Ask the device for its pointer input socket address.
    pub async fn pointer_socket_path(&self) -> Result<String> {
        let resp: PointerInputSocket = self
            .call_as(ProtocolConfig::POINTER_SOCKET_URI, None)
            .await?;
        Ok(resp.socket_path)
    }

    /// Look up and dial the pointer input socket.
    pub async fn open_pointer_socket(
        &self,
        dialer: &Dialer,
    ) -> Result<(PointerSocket, JoinHandle<TvError>)> {
        let path = self.pointer_socket_path().await?;
        let url = dialer.url_for(&path)?;
        let connection = dialer.dial_url(&url).await?;
        Ok(PointerSocket::start(connection))
    }
}
