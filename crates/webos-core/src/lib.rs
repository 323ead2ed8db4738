//! webOS Core - multiplexed client for the webOS TV websocket API.
//!
//! One websocket carries every exchange with the device: request/response
//! calls, the pairing handshake and long-lived subscriptions. Each outbound
//! message carries a correlation token; a single dispatcher task reads the
//! socket and routes every inbound message to the exchange waiting on its
//! token. When the socket dies, every waiting exchange is released at once.
//!
//! # Example
//!
//! ```rust,ignore
//! use webos_core::{ClientConfig, Dialer, TvClient};
//!
//! #[tokio::main]
//! async fn main() -> webos_core::Result<()> {
//!     let connection = Dialer::new().dial("LGsmartTV.lan").await?;
//!     let (tv, dispatcher) = TvClient::start(connection, ClientConfig::default());
//!
//!     // Keep the returned key to skip the on-screen prompt next time.
//!     let key = tv.register(None).await?;
//!     println!("client key: {:?}", key);
//!
//!     let volume = tv.call("ssap://audio/getVolume", None).await?;
//!     println!("{:?}", volume);
//!
//!     tv.close().await?;
//!     dispatcher.join().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod pointer;
pub mod ws;

mod client;
mod dispatcher;
mod handshake;
mod registry;
mod token;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use client::TvClient;
pub use config::{ClientConfig, DialConfig, ProtocolConfig};
pub use connection::{memory_pair, Connection, Frame, FrameReader, FrameWriter, MemoryPeer};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{ProtocolError, Result, TvError};
pub use handshake::hello_payload;
pub use message::{Message, MessageType, Payload};
pub use pointer::PointerSocket;
pub use ws::{Dialer, TvConnection, WsConnection};
