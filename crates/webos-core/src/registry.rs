//! Correlation registry: token -> delivery sink.
//!
//! One registry per connection. All operations take the same short-held
//! lock and never await while holding it. Closing an entry means dropping
//! its sender, which wakes the receiver with `None`.

use crate::message::Message;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where the dispatcher delivers messages for a token.
#[derive(Debug, Clone)]
pub(crate) enum Sink {
    /// Consumed at most once by its owner. Delivery never blocks; a frame
    /// arriving while the slot is still full is dropped.
    Once(mpsc::Sender<Message>),
    /// Consumed repeatedly. Delivery waits for capacity, so a slow consumer
    /// stalls the dispatcher.
    Stream(mpsc::Sender<Message>),
}

impl Sink {
    /// Push a message into the sink.
    pub(crate) async fn deliver(&self, msg: Message) {
        match self {
            Sink::Once(tx) => match tx.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    warn!(
                        "Dropping extra {} message for token {:?}: response already pending",
                        msg.kind, msg.id
                    );
                }
                Err(mpsc::error::TrySendError::Closed(msg)) => {
                    debug!("Receiver for token {:?} is gone, message dropped", msg.id);
                }
            },
            Sink::Stream(tx) => {
                if let Err(err) = tx.send(msg).await {
                    debug!("Subscriber for token {:?} is gone, message dropped", err.0.id);
                }
            }
        }
    }
}

/// Why a registration was refused.
#[derive(Debug)]
pub(crate) enum RegisterError {
    /// The token is already live; the sink is handed back.
    TokenInUse(Sink),
    /// The dispatcher has terminated; no further exchanges are possible.
    Closed,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Sink>,
    closed: bool,
}

/// Token-to-sink map owned by one connection.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // The map stays consistent across a panic in any holder.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a sink under `token`.
    pub(crate) fn register(&self, token: &str, sink: Sink) -> Result<(), RegisterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RegisterError::Closed);
        }
        if state.entries.contains_key(token) {
            return Err(RegisterError::TokenInUse(sink));
        }
        state.entries.insert(token.to_string(), sink);
        Ok(())
    }

    /// Install a sink under the first token from `next_token` that is not
    /// already live, giving up after `attempts` draws.
    pub(crate) fn register_fresh(
        &self,
        mut sink: Sink,
        attempts: usize,
        mut next_token: impl FnMut() -> String,
    ) -> Result<String, RegisterError> {
        for _ in 0..attempts.max(1) {
            let token = next_token();
            match self.register(&token, sink) {
                Ok(()) => return Ok(token),
                Err(RegisterError::TokenInUse(returned)) => {
                    debug!("Token {} already in use, drawing another", token);
                    sink = returned;
                }
                Err(RegisterError::Closed) => return Err(RegisterError::Closed),
            }
        }
        Err(RegisterError::TokenInUse(sink))
    }

    /// Find the sink for `token`.
    pub(crate) fn lookup(&self, token: &str) -> Option<Sink> {
        self.lock().entries.get(token).cloned()
    }

    /// Remove and close the sink for `token`. Returns false if it was not
    /// registered.
    pub(crate) fn unregister(&self, token: &str) -> bool {
        self.lock().entries.remove(token).is_some()
    }

    /// Close every entry and refuse future registrations. Returns how many
    /// entries were closed.
    pub(crate) fn drain_all(&self) -> usize {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.entries)
        };
        let count = drained.len();
        drop(drained);
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Unregisters its token when dropped, covering every exit path of an
/// exchange including cancellation of the owning future.
pub(crate) struct Registration<'a> {
    registry: &'a Registry,
    token: String,
    armed: bool,
}

impl<'a> Registration<'a> {
    pub(crate) fn new(registry: &'a Registry, token: String) -> Self {
        Self {
            registry,
            token,
            armed: true,
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// Leave the entry registered and hand its token to the caller, who
    /// becomes responsible for unregistering it.
    pub(crate) fn keep(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.token)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.unregister(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn once() -> (Sink, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(1);
        (Sink::Once(tx), rx)
    }

    #[tokio::test]
    async fn test_register_lookup_deliver() {
        let registry = Registry::new();
        let (sink, mut rx) = once();
        registry.register("tok", sink).unwrap();

        let sink = registry.lookup("tok").expect("registered");
        sink.deliver(Message::new(MessageType::Response, "tok")).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.id.as_deref(), Some("tok"));
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let registry = Registry::new();
        let (first, _rx1) = once();
        let (second, _rx2) = once();

        registry.register("tok", first).unwrap();
        assert!(matches!(
            registry.register("tok", second),
            Err(RegisterError::TokenInUse(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_and_is_idempotent() {
        let registry = Registry::new();
        let (sink, mut rx) = once();
        registry.register("tok", sink).unwrap();

        assert!(registry.unregister("tok"));
        assert!(!registry.unregister("tok"));
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_all_closes_everything() {
        let registry = Registry::new();
        let (a, mut rx_a) = once();
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register("a", a).unwrap();
        registry.register("b", Sink::Stream(tx_b)).unwrap();

        assert_eq!(registry.drain_all(), 2);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_closed());
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());

        let (late, _rx) = once();
        assert!(matches!(registry.register("c", late), Err(RegisterError::Closed)));
    }

    #[tokio::test]
    async fn test_once_sink_drops_when_full() {
        let (sink, mut rx) = once();
        sink.deliver(Message::new(MessageType::Response, "first")).await;
        sink.deliver(Message::new(MessageType::Response, "second")).await;

        assert_eq!(rx.recv().await.unwrap().id.as_deref(), Some("first"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registration_guard_unregisters() {
        let registry = Registry::new();
        let (sink, _rx) = once();
        registry.register("tok", sink).unwrap();
        {
            let guard = Registration::new(&registry, "tok".to_string());
            assert_eq!(guard.token(), "tok");
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_register_fresh_redraws_then_gives_up() {
        let registry = Registry::new();
        let (sink, _rx) = once();
        registry.register("taken", sink).unwrap();

        let mut draws = vec!["fresh", "taken"];
        let (sink, _rx) = once();
        let token = registry
            .register_fresh(sink, 4, || draws.pop().unwrap().to_string())
            .unwrap();
        assert_eq!(token, "fresh");

        let mut calls = 0;
        let (sink, _rx) = once();
        let result = registry.register_fresh(sink, 3, || {
            calls += 1;
            "taken".to_string()
        });
        assert!(matches!(result, Err(RegisterError::TokenInUse(_))));
        assert_eq!(calls, 3);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registration_keep_leaves_entry() {
        let registry = Registry::new();
        let (sink, _rx) = once();
        registry.register("tok", sink).unwrap();

        let token = Registration::new(&registry, "tok".to_string()).keep();
        assert_eq!(token, "tok");
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&token));
    }
}
