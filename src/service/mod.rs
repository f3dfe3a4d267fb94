//! # Service Layer
//!
//! Runs a [`Session`](crate::protocol::Session) over a transport on a tokio
//! task, owning the keepalive timer and the request timeout sweep.

pub mod client;

pub use client::{SessionClient, SessionHandle};
