//! # Utility Modules
//!
//! Supporting utilities for the session layer.
//!
//! ## Components
//! - **Crypto**: X25519 agreement, HKDF expansion, HMAC-SHA256 and AES-256-CBC
//! - **Logging**: `tracing` subscriber setup
//! - **Metrics**: per-session atomic counters
//! - **Time**: timestamps and message tag generation
//! - **Timeout**: async timeout wrappers and default intervals
//!
//! ## Security
//! - Randomness from the OS CSPRNG (getrandom) behind [`crypto::KeyProvider`]
//! - MAC comparison in constant time (subtle)
//! - Key material held in `Zeroizing` buffers

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;

pub use crypto::{EphemeralKeyPair, KeyProvider, OsKeyProvider};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use time::MessageTagGenerator;
