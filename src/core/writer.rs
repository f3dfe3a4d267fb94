//! Encoder for the binary node format; the inverse of [`NodeReader`].
//!
//! [`NodeReader`]: crate::core::NodeReader

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::node::{Node, NodeContent};
use crate::core::tokens::{self, *};
use crate::error::{ProtocolError, Result};

const BINARY_8_LIMIT: usize = 1 << 8;
const BINARY_20_LIMIT: usize = 1 << 20;
const BINARY_32_LIMIT: u64 = 1 << 32;

/// Pick the `BINARY_*` tag for a blob of `len` bytes.
pub(crate) fn binary_tag(len: usize) -> Result<u8> {
    if len < BINARY_8_LIMIT {
        Ok(BINARY_8)
    } else if len < BINARY_20_LIMIT {
        Ok(BINARY_20)
    } else if (len as u64) < BINARY_32_LIMIT {
        Ok(BINARY_32)
    } else {
        Err(ProtocolError::StringTooLarge(len))
    }
}

/// Growable output buffer for one encoded node.
#[derive(Default)]
pub struct NodeWriter {
    buf: BytesMut,
}

impl NodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `node` into a fresh buffer.
    pub fn encode(node: &Node) -> Result<Bytes> {
        let mut writer = NodeWriter::new();
        writer.write_node(node)?;
        Ok(writer.into_bytes())
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn push_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn push_int_n(&mut self, value: u64, n: usize, little_endian: bool) {
        for i in 0..n {
            let shift = if little_endian { i } else { n - 1 - i };
            self.buf.put_u8((value >> (shift * 8)) as u8);
        }
    }

    pub fn push_int20(&mut self, value: u32) {
        self.buf.put_u8(((value >> 16) & 0x0f) as u8);
        self.buf.put_u8((value >> 8) as u8);
        self.buf.put_u8(value as u8);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_list_start(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            self.push_byte(LIST_EMPTY);
        } else if size < 256 {
            self.push_byte(LIST_8);
            self.push_byte(size as u8);
        } else if size < 65536 {
            self.push_byte(LIST_16);
            self.push_int_n(size as u64, 2, false);
        } else {
            return Err(ProtocolError::ListTooLarge(size));
        }
        Ok(())
    }

    /// Length-prefixed raw write using the smallest tier that fits.
    pub fn write_binary(&mut self, data: &[u8]) -> Result<()> {
        let len = data.len();
        match binary_tag(len)? {
            BINARY_8 => {
                self.push_byte(BINARY_8);
                self.push_byte(len as u8);
            }
            BINARY_20 => {
                self.push_byte(BINARY_20);
                self.push_int20(len as u32);
            }
            _ => {
                self.push_byte(BINARY_32);
                self.push_int_n(len as u64, 4, false);
            }
        }
        self.push_bytes(data);
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        // "c.us" rides on the user server token, which the reader aliases back.
        // The server name itself is never tokenised, or it would read back as
        // the alias.
        if s == USER_SERVER_ALIAS {
            if let Some(index) = tokens::single_byte_index(USER_SERVER) {
                self.push_byte(index);
                return Ok(());
            }
        }
        if s != USER_SERVER {
            if let Some(index) = tokens::single_byte_index(s) {
                self.push_byte(index);
                return Ok(());
            }
        }

        match s.find('@') {
            Some(at) if at >= 1 && s.matches('@').count() == 1 => {
                self.write_jid(&s[..at], &s[at + 1..])
            }
            _ => self.write_binary(s.as_bytes()),
        }
    }

    fn write_jid(&mut self, left: &str, right: &str) -> Result<()> {
        self.push_byte(JID_PAIR);
        if left.is_empty() {
            self.push_byte(LIST_EMPTY);
        } else if left.len() <= PACKED_MAX && packing_for(left).is_some() {
            self.write_packed(left)?;
        } else {
            self.write_string(left)?;
        }
        self.write_string(right)
    }

    /// Nibble-pack `s`, falling back to hex packing.
    pub fn write_packed(&mut self, s: &str) -> Result<()> {
        let count = s.chars().count();
        if count > PACKED_MAX {
            return Err(ProtocolError::PackedStringTooLarge(count));
        }
        let tag = packing_for(s).ok_or_else(|| {
            let bad = s
                .bytes()
                .find(|c| !matches!(c, b'0'..=b'9' | b'A'..=b'F' | b'-' | b'.'))
                .unwrap_or(b'?');
            ProtocolError::InvalidNibble(bad)
        })?;

        let bytes = s.as_bytes();
        self.push_byte(tag);
        self.push_byte((((count % 2) as u8) << 7) | count.div_ceil(2) as u8);
        for pair in bytes.chunks(2) {
            let hi = pack(tag, pair[0]);
            let lo = pair.get(1).map_or(0x0f, |c| pack(tag, *c));
            self.push_byte((hi << 4) | lo);
        }
        Ok(())
    }

    fn write_attributes(&mut self, node: &Node) -> Result<()> {
        for (key, value) in node.attrs() {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Encode one node; children deeper than [`MAX_DEPTH`] are rejected.
    pub fn write_node(&mut self, node: &Node) -> Result<()> {
        self.write_node_at(node, 1)
    }

    fn write_node_at(&mut self, node: &Node, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_DEPTH));
        }
        self.write_list_start(node.list_size())?;
        self.write_string(&node.tag)?;
        self.write_attributes(node)?;

        match &node.content {
            NodeContent::None => {}
            NodeContent::Bytes(data) => self.write_binary(data)?,
            NodeContent::Nodes(children) => {
                self.write_list_start(children.len())?;
                for child in children {
                    self.write_node_at(child, depth + 1)?;
                }
            }
            NodeContent::Text(s) => self.write_string(s)?,
        }
        Ok(())
    }
}

/// Packing tag able to represent every character of `s`, nibble preferred.
fn packing_for(s: &str) -> Option<u8> {
    if s.bytes().all(|c| c.is_ascii_digit() || c == b'-' || c == b'.') {
        Some(NIBBLE_8)
    } else if s.bytes().all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(&c)) {
        Some(HEX_8)
    } else {
        None
    }
}

fn pack(tag: u8, c: u8) -> u8 {
    match (tag, c) {
        (_, b'0'..=b'9') => c - b'0',
        (NIBBLE_8, b'-') => 10,
        (NIBBLE_8, b'.') => 11,
        (_, b'A'..=b'F') => c - b'A' + 10,
        _ => 0x0f,
    }
}
