//! Centralized configuration for the webOS client.
//!
//! Protocol and dial parameters are grouped as constants; per-client knobs
//! live in [`ClientConfig`].

use std::time::Duration;

/// Protocol-level constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Default deadline for an ordinary request/response call.
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);
    /// Overall deadline for the pairing handshake, which may wait on a human.
    pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
    /// Length of generated correlation tokens.
    pub const TOKEN_LEN: usize = 8;
    /// Shortest token length a client accepts.
    pub const MIN_TOKEN_LEN: usize = 4;
    /// Draws before giving up on finding a token not already in use.
    pub const TOKEN_ATTEMPTS: usize = 16;
    /// Capacity of the sink created by `monitor`.
    pub const MONITOR_BUFFER: usize = 1;
    /// Payload key carrying the pairing key in both directions.
    pub const CLIENT_KEY_FIELD: &'static str = "client-key";
    /// URI that yields the pointer input socket address.
    pub const POINTER_SOCKET_URI: &'static str =
        "ssap://com.webos.service.networkinput/getPointerInputSocket";
}

/// Dial parameters for the device's websocket endpoints.
pub struct DialConfig;

impl DialConfig {
    pub const PLAIN_PORT: u16 = 3000;
    pub const TLS_PORT: u16 = 3001;
    /// Bound on TCP connect plus TLS and websocket handshakes.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Runtime configuration for a single client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline used by `call` when no explicit timeout is given.
    pub call_timeout: Duration,
    /// Overall deadline for `register`.
    pub register_timeout: Duration,
    /// Capacity of the sink `monitor` subscribes with. Never zero.
    monitor_buffer: usize,
    /// Length of generated correlation tokens. At least `MIN_TOKEN_LEN`.
    token_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: ProtocolConfig::CALL_TIMEOUT,
            register_timeout: ProtocolConfig::REGISTER_TIMEOUT,
            monitor_buffer: ProtocolConfig::MONITOR_BUFFER,
            token_len: ProtocolConfig::TOKEN_LEN,
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the pairing deadline.
    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    /// Set the monitor sink capacity (clamped to at least 1).
    pub fn with_monitor_buffer(mut self, capacity: usize) -> Self {
        self.monitor_buffer = capacity.max(1);
        self
    }

    /// Set the correlation token length (clamped to at least 4).
    pub fn with_token_len(mut self, len: usize) -> Self {
        self.token_len = len.max(ProtocolConfig::MIN_TOKEN_LEN);
        self
    }

    pub fn monitor_buffer(&self) -> usize {
        self.monitor_buffer
    }

    pub fn token_len(&self) -> usize {
        self.token_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.register_timeout, Duration::from_secs(30));
        assert_eq!(config.monitor_buffer(), 1);
        assert_eq!(config.token_len(), 8);
    }

    #[test]
    fn test_builder_clamps() {
        let config = ClientConfig::new()
            .with_monitor_buffer(0)
            .with_token_len(1)
            .with_call_timeout(Duration::from_millis(250));
        assert_eq!(config.monitor_buffer(), 1);
        assert_eq!(config.token_len(), 4);
        assert_eq!(config.call_timeout, Duration::from_millis(250));
    }
}
