//! # wa-web-protocol
//!
//! Client side of the WhatsApp Web socket protocol: the binary node codec,
//! the QR pairing handshake and the authenticated session that follows it.
//!
//! ## Layers
//! - [`core`]: token dictionaries, [`Node`](core::Node) trees and the
//!   reader/writer pair for the binary format
//! - [`utils::crypto`]: X25519, shared-secret expansion, HMAC-SHA256 and
//!   AES-256-CBC
//! - [`protocol`]: frame classification, the handshake and the sans-I/O
//!   [`Session`](protocol::Session) state machine
//! - [`service`]: a tokio driver running a session over any [`transport`]
//!
//! ## Example
//! ```rust,no_run
//! use wa_web_protocol::config::SessionConfig;
//! use wa_web_protocol::protocol::SessionEvent;
//! use wa_web_protocol::service::SessionClient;
//! use wa_web_protocol::transport::duplex;
//! use wa_web_protocol::utils::OsKeyProvider;
//!
//! # async fn run() {
//! let config = SessionConfig::default();
//! let (client_end, _server_end) = duplex(16);
//! let (handle, mut events) = SessionClient::new(config.client, OsKeyProvider).spawn(client_end);
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::QrReady(qr) = event {
//!         println!("scan: {qr}");
//!     }
//! }
//! handle.close();
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::{Node, NodeContent, NodeReader, NodeWriter};
pub use crate::error::{FailureReason, ProtocolError, Result};
pub use crate::protocol::{Session, SessionEvent, SessionState};
