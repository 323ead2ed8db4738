//! Client handle: writer, request/response calls and subscriptions.
//!
//! Every exchange follows the same shape: register a sink under a fresh
//! token, write the outbound message, then wait on the sink. The
//! [`Dispatcher`] is the only reader of the connection and fills the sinks.
//!
//! # Thread Safety
//!
//! `TvClient` is cheap to clone and every method takes `&self`. Writes are
//! serialized by an async mutex around the write side, so frames are never
//! interleaved; the order between independent callers is whoever takes the
//! lock first.

use crate::cancel::CancellationToken;
use crate::classify;
use crate::config::{ClientConfig, ProtocolConfig};
use crate::connection::{Connection, Frame, FrameWriter};
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::error::{Result, TvError};
use crate::message::{Message, MessageType, Payload};
use crate::registry::{RegisterError, Registration, Registry, Sink};
use crate::token;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// State shared by a client and its dispatcher.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    writer: Mutex<Box<dyn FrameWriter>>,
    config: ClientConfig,
}

/// Handle for issuing calls, pairing and subscriptions over one connection.
#[derive(Clone)]
pub struct TvClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TvClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvClient")
            .field("pending", &self.pending())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl TvClient {
    /// Split a connection into a client and its (not yet running) dispatcher.
    ///
    /// Nothing is read until [`Dispatcher::run`] is polled; use
    /// [`start`](Self::start) to spawn it.
    pub fn new<C: Connection>(connection: C, config: ClientConfig) -> (Self, Dispatcher<C::Reader>) {
        let (writer, reader) = connection.split();
        let shared = Arc::new(Shared {
            registry: Registry::new(),
            writer: Mutex::new(Box::new(writer)),
            config,
        });
        let dispatcher = Dispatcher::new(reader, shared.clone());
        (Self { shared }, dispatcher)
    }

    /// Split a connection and spawn its dispatcher on the current runtime.
    pub fn start<C: Connection>(connection: C, config: ClientConfig) -> (Self, DispatcherHandle) {
        let (client, dispatcher) = Self::new(connection, config);
        (client, DispatcherHandle::spawn(dispatcher))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Number of exchanges currently waiting for the device.
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether the dispatcher has terminated and no new exchange can start.
    pub fn is_closed(&self) -> bool {
        self.shared.registry.is_closed()
    }

    /// Close the write side of the connection.
    pub async fn close(&self) -> Result<()> {
        self.shared.writer.lock().await.close().await
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Register a sink under a fresh token.
    pub(crate) fn register_sink(&self, sink: Sink) -> Result<String> {
        let len = self.shared.config.token_len();
        match self.shared.registry.register_fresh(
            sink,
            ProtocolConfig::TOKEN_ATTEMPTS,
            || token::generate(len),
        ) {
            Ok(token) => Ok(token),
            Err(RegisterError::TokenInUse(_)) => {
                Err(TvError::TokensExhausted(ProtocolConfig::TOKEN_ATTEMPTS))
            }
            Err(RegisterError::Closed) => Err(TvError::ConnectionClosed),
        }
    }

    /// Encode and write one message.
    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        let text = serde_json::to_string(msg).map_err(|e| TvError::Json {
            message: format!("Failed to encode {} message: {}", msg.kind, e),
            source: Some(e),
        })?;
        debug!("write: {}", text);

        let mut writer = self.shared.writer.lock().await;
        writer.send(Frame::Text(text)).await
    }

    /// Call `uri` and return the payload of a successful response, using the
    /// configured default timeout.
    pub async fn call(&self, uri: &str, payload: Option<Payload>) -> Result<Payload> {
        self.call_with_timeout(uri, payload, self.shared.config.call_timeout)
            .await
    }

    /// Call `uri` with an explicit deadline.
    pub async fn call_with_timeout(
        &self,
        uri: &str,
        payload: Option<Payload>,
        timeout: Duration,
    ) -> Result<Payload> {
        let response = self.call_raw(uri, payload, timeout).await?;
        classify::check_response(&response)?;
        Ok(response.payload.unwrap_or_default())
    }

    /// Call `uri` and decode the response payload into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        uri: &str,
        payload: Option<Payload>,
    ) -> Result<T> {
        let payload = self.call(uri, payload).await?;
        serde_json::from_value(serde_json::Value::Object(payload))
            .map_err(|e| TvError::decode(e, &format!("response from {}", uri)))
    }

    /// Call `uri` and return the device's message without classifying it.
    pub async fn call_raw(
        &self,
        uri: &str,
        payload: Option<Payload>,
        timeout: Duration,
    ) -> Result<Message> {
        let (tx, mut rx) = mpsc::channel(1);
        let token = self.register_sink(Sink::Once(tx))?;
        let registration = Registration::new(self.registry(), token);

        let request = Message::new(MessageType::Request, registration.token())
            .with_uri(uri)
            .with_payload(payload);
        self.send(&request).await?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => {
                debug!("Call to {} timed out after {:?}", uri, timeout);
                Err(TvError::Timeout(timeout))
            }
            Ok(None) => Err(TvError::NoResponse),
            Ok(Some(response)) => Ok(response),
        }
    }

    /// Subscribe to `uri`, delivering every pushed message into `sink`.
    ///
    /// Returns as soon as the subscribe message is written. The sink must
    /// be drained promptly: the dispatcher waits for capacity, and a stalled
    /// subscriber stalls every other exchange on the connection.
    ///
    /// The receiver sees `None` when the subscription ends only if `sink`
    /// was the last sender for it. Keep no other clone of `sink` if you rely
    /// on that signal.
    pub async fn subscribe(
        &self,
        uri: &str,
        payload: Option<Payload>,
        sink: mpsc::Sender<Message>,
    ) -> Result<String> {
        let token = self.register_sink(Sink::Stream(sink))?;
        let registration = Registration::new(self.registry(), token);

        let msg = Message::new(MessageType::Subscribe, registration.token())
            .with_uri(uri)
            .with_payload(payload);
        self.send(&msg).await?;
        Ok(registration.keep())
    }

    /// End a subscription.
    ///
    /// The local sink is closed first, so bookkeeping is released even when
    /// writing the unsubscribe message fails.
    pub async fn unsubscribe(&self, uri: &str, token: &str) -> Result<()> {
        self.shared.registry.unregister(token);

        let msg = Message::new(MessageType::Unsubscribe, token).with_uri(uri);
        self.send(&msg).await
    }

    /// Subscribe to `uri` and feed each non-empty pushed payload to
    /// `on_event` until the connection ends, `cancel` fires, or `on_event`
    /// fails.
    ///
    /// Exactly one unsubscribe is attempted on every exit path once the
    /// subscription was established, including when this future is dropped
    /// before it completes. A closed connection and cancellation
    /// both end the monitor with `Ok(())`; a callback error is returned as is.
    pub async fn monitor<F, E>(
        &self,
        uri: &str,
        payload: Option<Payload>,
        mut on_event: F,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), E>
    where
        F: FnMut(Payload) -> std::result::Result<(), E>,
        E: From<TvError>,
    {
        let (tx, mut rx) = mpsc::channel(self.shared.config.monitor_buffer());
        let token = self.subscribe(uri, payload, tx).await?;
        let subscription = Subscription::new(self.clone(), uri, token);

        let outcome = loop {
            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Monitor of {} cancelled", uri);
                    break Ok(());
                }
                delivered = rx.recv() => delivered,
            };

            let Some(msg) = delivered else {
                debug!("Monitor of {} ended: connection closed", uri);
                break Ok(());
            };

            match msg.payload {
                Some(payload) if !payload.is_empty() => {
                    if let Err(err) = on_event(payload) {
                        break Err(err);
                    }
                }
                _ => continue,
            }
        };

        if let Err(err) = subscription.finish().await {
            if !err.is_transport_failure() {
                warn!("Failed to unsubscribe from {}: {}", uri, err);
            } else {
                debug!("Unsubscribe from {} not sent: {}", uri, err);
            }
        }
        outcome
    }
}

/// A live subscription owned by `monitor`.
///
/// If the owning future is dropped before `finish`, the token is released
/// immediately and the unsubscribe is written from a spawned task.
struct Subscription {
    client: TvClient,
    uri: String,
    token: Option<String>,
}

impl Subscription {
    fn new(client: TvClient, uri: &str, token: String) -> Self {
        Self {
            client,
            uri: uri.to_string(),
            token: Some(token),
        }
    }

    async fn finish(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.client.unsubscribe(&self.uri, &token).await,
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        self.client.registry().unregister(&token);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to unsubscribe from {} on drop", self.uri);
            return;
        };
        let client = self.client.clone();
        let msg = Message::new(MessageType::Unsubscribe, token).with_uri(std::mem::take(&mut self.uri));
        runtime.spawn(async move {
            if let Err(err) = client.send(&msg).await {
                debug!("Unsubscribe after abandoned monitor not sent: {}", err);
            }
        });
    }
}
