//! The single reader of a connection.
//!
//! The dispatcher owns the read side for the connection's lifetime, decodes
//! each text frame and hands it to the sink registered under its token.
//! When the transport fails it closes every registered sink, which is how
//! every pending call and subscription learns the connection is gone.

use crate::client::Shared;
use crate::connection::{Frame, FrameReader};
use crate::error::TvError;
use crate::message::Message;
use crate::registry::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Read loop for one connection. Created by [`TvClient::new`](crate::TvClient::new).
pub struct Dispatcher<R> {
    reader: R,
    shared: Arc<Shared>,
}

impl<R: FrameReader> Dispatcher<R> {
    pub(crate) fn new(reader: R, shared: Arc<Shared>) -> Self {
        Self { reader, shared }
    }

    /// Run until the transport fails and return that failure.
    ///
    /// The registry is drained when the dispatcher is dropped, so it is
    /// empty afterwards even if this future is cancelled mid-read.
    pub async fn run(mut self) -> TvError {
        loop {
            let frame = match self.reader.receive().await {
                Ok(frame) => frame,
                Err(err) => {
                    info!("Dispatcher stopping: {}", err);
                    return err;
                }
            };

            let text = match frame {
                Frame::Text(text) => text,
                Frame::Binary(_) => {
                    debug!("non-text message type, ignored");
                    continue;
                }
            };
            debug!("read: {}", text);

            let msg: Message = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(err) => {
                    debug!("invalid json in message, ignored: {}", err);
                    continue;
                }
            };

            route(&self.shared.registry, msg).await;
        }
    }
}

/// Deliver a message to the sink registered under its token, or drop it.
async fn route(registry: &Registry, msg: Message) {
    let Some(token) = msg.id.as_deref() else {
        debug!("{} message without id, ignored", msg.kind);
        return;
    };

    let Some(sink) = registry.lookup(token) else {
        debug!(
            "no exchange registered for token {}, {} message dropped",
            token, msg.kind
        );
        return;
    };
    sink.deliver(msg).await;
}

impl<R> Drop for Dispatcher<R> {
    fn drop(&mut self) {
        let closed = self.shared.registry.drain_all();
        if closed > 0 {
            info!("Closed {} pending exchange(s)", closed);
        }
    }
}

/// Handle to a spawned dispatcher.
pub struct DispatcherHandle {
    task: JoinHandle<TvError>,
}

impl DispatcherHandle {
    pub(crate) fn spawn<R: FrameReader>(dispatcher: Dispatcher<R>) -> Self {
        Self {
            task: tokio::spawn(dispatcher.run()),
        }
    }

    /// Check whether the read loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the read loop to exit and return the transport failure
    /// that ended it.
    pub async fn join(self) -> TvError {
        match self.task.await {
            Ok(err) => err,
            Err(join_err) => TvError::transport(format!("dispatcher task failed: {}", join_err)),
        }
    }
}
