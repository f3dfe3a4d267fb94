//! # Binary Node Codec
//!
//! Serialization between byte buffers and the protocol's [`Node`] trees.
//!
//! ## Components
//! - **Tokens**: structural tags and the single/double-byte dictionaries
//! - **Node**: the `[description, attributes, content]` tree element
//! - **Reader**: bounds-checked decoder
//! - **Writer**: deterministic encoder, the inverse of the reader
//!
//! ## Wire Format
//! ```text
//! node    := list-size description (key value)* content?
//! content := list-size node* | BINARY_n len bytes | string
//! string  := token | DICTIONARY_n index | BINARY_n len utf8
//!          | JID_PAIR string string | NIBBLE_8/HEX_8 packed
//! ```
//!
//! ## Round-trip
//! `NodeReader::decode(&NodeWriter::encode(&node)?)? == node` for every node
//! with unique attribute keys.

pub mod node;
pub mod reader;
pub mod tokens;
pub mod writer;

pub use node::{Node, NodeContent};
pub use reader::NodeReader;
pub use writer::NodeWriter;
