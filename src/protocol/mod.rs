//! # Session Protocol
//!
//! Framing, the QR pairing handshake and the session state machine.
//!
//! ## Components
//! - **Message**: classification of inbound frames and builders for outbound ones
//! - **Handshake**: `Conn` payload processing and authenticated frame sealing
//! - **Pending**: tag-keyed table of requests awaiting replies
//! - **Session**: sans-I/O state machine tying the above together
//!
//! ## Security
//! - A MAC mismatch or decryption failure moves the session to `Failed`
//! - MACs are compared in constant time before anything is decrypted
//! - Key material is dropped on close or failure

pub mod handshake;
pub mod message;
pub mod pending;
pub mod session;

pub use handshake::{ConnPayload, ConnectionOpts, HandshakeMaterial, SessionKeys};
pub use message::{ControlMessage, Inbound, TaggedFrame, WireFrame};
pub use pending::{Reply, RequestKind};
pub use session::{Action, Outbound, Session, SessionEvent, SessionState};
