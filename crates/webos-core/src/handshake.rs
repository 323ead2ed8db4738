//! Device pairing.
//!
//! The `register` exchange differs from an ordinary call: the device may
//! answer with any number of `response` acknowledgements (for example while
//! the user confirms the prompt on screen) before the terminal `registered`
//! message that carries the client key.

use crate::classify;
use crate::client::TvClient;
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result, TvError};
use crate::message::{Message, MessageType, Payload};
use crate::registry::{Registration, Sink};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

impl TvClient {
    /// Pair with the device.
    ///
    /// `client_key` is a key stored from an earlier pairing; without one the
    /// device prompts the user. Returns the key the device sent back, or
    /// `None` if it sent none, in which case the stored key stays valid.
    pub async fn register(&self, client_key: Option<&str>) -> Result<Option<String>> {
        let (tx, mut rx) = mpsc::channel(1);
        let token = self.register_sink(Sink::Stream(tx))?;
        let registration = Registration::new(self.registry(), token);

        let mut payload = hello_payload();
        if let Some(key) = client_key.filter(|k| !k.is_empty()) {
            payload.insert(ProtocolConfig::CLIENT_KEY_FIELD.into(), key.into());
        }
        let hello = Message::new(MessageType::Register, registration.token()).with_payload(Some(payload));
        self.send(&hello).await?;

        let timeout = self.config().register_timeout;
        let deadline = Instant::now() + timeout;
        let terminal = loop {
            let msg = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => return Err(TvError::Timeout(timeout)),
                Ok(None) => return Err(TvError::NoResponse),
                Ok(Some(msg)) => msg,
            };

            match msg.kind {
                MessageType::Response | MessageType::Registered | MessageType::Error => {}
                ref other => {
                    debug!("Unexpected {} message during pairing", other);
                    return Err(ProtocolError::RegistrationFailed.into());
                }
            }
            if msg.kind == MessageType::Registered && msg.payload.is_none() {
                return Err(ProtocolError::RegistrationFailed.into());
            }
            classify::check_response(&msg)?;

            if msg.kind == MessageType::Registered {
                break msg;
            }
            debug!("Pairing acknowledged, waiting for confirmation on the device");
        };

        let new_key = match terminal
            .payload
            .as_ref()
            .and_then(|p| p.get(ProtocolConfig::CLIENT_KEY_FIELD))
        {
            None => None,
            Some(Value::String(key)) => Some(key.clone()),
            Some(_) => return Err(ProtocolError::ClientKeyNotString.into()),
        };

        info!(
            "Paired with device{}",
            if new_key.is_some() { ", received client key" } else { "" }
        );
        Ok(new_key)
    }
}

const SIGNED_PERMISSIONS: &[&str] = &[
    "TEST_SECURE",
    "CONTROL_INPUT_TEXT",
    "CONTROL_MOUSE_AND_KEYBOARD",
    "READ_INSTALLED_APPS",
    "READ_LGE_SDX",
    "READ_NOTIFICATIONS",
    "SEARCH",
    "WRITE_SETTINGS",
    "WRITE_NOTIFICATION_ALERT",
    "CONTROL_POWER",
    "READ_CURRENT_CHANNEL",
    "READ_RUNNING_APPS",
    "READ_UPDATE_INFO",
    "UPDATE_FROM_REMOTE_APP",
    "READ_LGE_TV_INPUT_EVENTS",
    "READ_TV_CURRENT_TIME",
];

const PERMISSIONS: &[&str] = &[
    "LAUNCH",
    "LAUNCH_WEBAPP",
    "APP_TO_APP",
    "CLOSE",
    "TEST_OPEN",
    "TEST_PROTECTED",
    "CONTROL_AUDIO",
    "CONTROL_DISPLAY",
    "CONTROL_INPUT_JOYSTICK",
    "CONTROL_INPUT_MEDIA_RECORDING",
    "CONTROL_INPUT_MEDIA_PLAYBACK",
    "CONTROL_INPUT_TV",
    "CONTROL_POWER",
    "READ_APP_STATUS",
    "READ_CURRENT_CHANNEL",
    "READ_INPUT_DEVICE_LIST",
    "READ_NETWORK_STATE",
    "READ_RUNNING_APPS",
    "READ_TV_CHANNEL_LIST",
    "WRITE_NOTIFICATION_TOAST",
    "READ_POWER_STATE",
    "READ_COUNTRY_INFO",
];

const MANIFEST_SIGNATURE: &str = "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw==";

/// Payload of the `register` message: pairing mode plus the signed
/// capability manifest the device checks.
pub fn hello_payload() -> Payload {
    let manifest = json!({
        "manifestVersion": 1,
        "appVersion": "1.1",
        "signed": {
            "created": "20140509",
            "appId": "com.lge.test",
            "vendorId": "com.lge",
            "localizedAppNames": {
                "": "LG Remote App",
                "ko-KR": "리모컨 앱",
                "zxx-XX": "ЛГ Rэмotэ AПП",
            },
            "localizedVendorNames": {
                "": "LG Electronics",
            },
            "permissions": SIGNED_PERMISSIONS,
            "serial": "2f930e2d2cfe083771f68e4fe7bb07",
        },
        "permissions": PERMISSIONS,
        "signatures": [
            {"signatureVersion": 1, "signature": MANIFEST_SIGNATURE},
        ],
    });

    let mut payload = Payload::new();
    payload.insert("forcePairing".into(), Value::Bool(false));
    payload.insert("pairingType".into(), "PROMPT".into());
    payload.insert("manifest".into(), manifest);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connection::{memory_pair, MemoryPeer};
    use crate::dispatcher::DispatcherHandle;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn start() -> (TvClient, DispatcherHandle, MemoryPeer) {
        let (conn, peer) = memory_pair();
        let (client, handle) = TvClient::start(conn, ClientConfig::default());
        (client, handle, peer)
    }

    fn spawn_register(client: &TvClient, key: Option<&str>) -> JoinHandle<Result<Option<String>>> {
        let client = client.clone();
        let key = key.map(str::to_string);
        tokio::spawn(async move { client.register(key.as_deref()).await })
    }

    #[test]
    fn test_hello_payload_shape() {
        let payload = hello_payload();
        assert_eq!(payload["forcePairing"], json!(false));
        assert_eq!(payload["pairingType"], json!("PROMPT"));
        assert_eq!(payload["manifest"]["manifestVersion"], json!(1));
        assert_eq!(payload["manifest"]["signed"]["appId"], json!("com.lge.test"));
        assert_eq!(
            payload["manifest"]["permissions"].as_array().map(Vec::len),
            Some(PERMISSIONS.len())
        );
        assert!(payload.get("client-key").is_none());
    }

    #[tokio::test]
    async fn test_register_skips_acknowledgements() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);

        let hello = peer.next_message().await.unwrap();
        assert_eq!(hello.kind, MessageType::Register);
        assert!(hello.uri.is_none());
        assert!(hello.payload.as_ref().unwrap().get("client-key").is_none());

        let id = hello.id.unwrap();
        peer.push_json(json!({"type": "response", "id": id, "payload": {"pairingType": "PROMPT", "returnValue": true}}));
        peer.push_json(json!({"type": "response", "id": id, "payload": {"returnValue": true}}));
        peer.push_json(json!({"type": "registered", "id": id, "payload": {"client-key": "X"}}));

        assert_eq!(pairing.await.unwrap().unwrap(), Some("X".to_string()));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_register_sends_stored_key() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, Some("stored-key"));

        let hello = peer.next_message().await.unwrap();
        assert_eq!(hello.payload.unwrap()["client-key"], json!("stored-key"));

        // No key in the answer: the stored one stays in use.
        peer.push_json(json!({"type": "registered", "id": hello.id, "payload": {}}));
        assert_eq!(pairing.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_transport_closes_mid_pairing() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);

        let id = peer.next_message().await.unwrap().id.unwrap();
        peer.push_json(json!({"type": "response", "id": id, "payload": {"returnValue": true}}));
        peer.push_json(json!({"type": "response", "id": id, "payload": {"returnValue": true}}));
        peer.disconnect();

        assert!(matches!(pairing.await.unwrap(), Err(TvError::NoResponse)));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_registered_without_payload_fails() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);

        let id = peer.next_message().await.unwrap().id.unwrap();
        peer.push_json(json!({"type": "registered", "id": id}));

        let err = pairing.await.unwrap().unwrap_err();
        assert_eq!(err.protocol(), Some(&ProtocolError::RegistrationFailed));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_register_error_aborts() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, Some("revoked"));

        let id = peer.next_message().await.unwrap().id.unwrap();
        peer.push_json(json!({"type": "error", "id": id, "error": "403 User denied access"}));

        let err = pairing.await.unwrap().unwrap_err();
        assert!(matches!(err.protocol(), Some(ProtocolError::Api { .. })));
    }

    #[tokio::test]
    async fn test_register_unexpected_type_fails_registration() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);

        let id = peer.next_message().await.unwrap().id.unwrap();
        peer.push_json(json!({"type": "response", "id": id, "payload": {"returnValue": true}}));
        peer.push_json(json!({"type": "hello", "id": id, "payload": {}}));

        let err = pairing.await.unwrap().unwrap_err();
        assert_eq!(err.protocol(), Some(&ProtocolError::RegistrationFailed));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_register_rejects_non_string_key() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);

        let id = peer.next_message().await.unwrap().id.unwrap();
        peer.push_json(json!({"type": "registered", "id": id, "payload": {"client-key": 42}}));

        let err = pairing.await.unwrap().unwrap_err();
        assert_eq!(err.protocol(), Some(&ProtocolError::ClientKeyNotString));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_deadline_is_overall() {
        let (client, _handle, mut peer) = start();
        let pairing = spawn_register(&client, None);
        let id = peer.next_message().await.unwrap().id.unwrap();

        // Acknowledgements keep arriving but the deadline does not move.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            peer.push_json(json!({"type": "response", "id": id, "payload": {"returnValue": true}}));
        }

        let err = pairing.await.unwrap().unwrap_err();
        assert!(matches!(err, TvError::Timeout(d) if d == Duration::from_secs(30)));
        assert_eq!(client.pending(), 0);
    }
}
