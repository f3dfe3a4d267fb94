//! Decoder for the binary node format.
//!
//! Every read is bounds-checked; a read past the end of the buffer fails with
//! [`ProtocolError::UnexpectedEndOfStream`] and the whole decode is abandoned.

use crate::core::node::{Node, NodeContent};
use crate::core::tokens::{self, *};
use crate::error::{ProtocolError, Result};
use tracing::trace;

/// Cursor over one encoded node.
pub struct NodeReader<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> NodeReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// Decode the node at the start of `data`. Trailing bytes are left unread.
    pub fn decode(data: &[u8]) -> Result<Node> {
        let mut reader = NodeReader::new(data);
        let node = reader.read_node()?;
        if reader.position() < data.len() {
            trace!(trailing = data.len() - reader.position(), "bytes left after node");
        }
        Ok(node)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.index
    }

    fn check_eos(&self, length: usize) -> Result<()> {
        match self.index.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(ProtocolError::UnexpectedEndOfStream),
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let ret = self.data[self.index];
        self.index += 1;
        Ok(ret)
    }

    /// Read an `n`-byte unsigned integer (`n` <= 8).
    pub fn read_int_n(&mut self, n: usize, little_endian: bool) -> Result<u64> {
        debug_assert!(n <= 8);
        self.check_eos(n)?;
        let bytes = &self.data[self.index..self.index + n];
        let mut ret = 0u64;
        for (i, byte) in bytes.iter().enumerate() {
            let shift = if little_endian { i } else { n - 1 - i };
            ret |= (*byte as u64) << (shift * 8);
        }
        self.index += n;
        Ok(ret)
    }

    pub fn read_int16(&mut self) -> Result<u16> {
        Ok(self.read_int_n(2, false)? as u16)
    }

    pub fn read_int20(&mut self) -> Result<u32> {
        self.check_eos(3)?;
        let b = &self.data[self.index..self.index + 3];
        let ret = ((b[0] as u32 & 0x0f) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        self.index += 3;
        Ok(ret)
    }

    pub fn read_int32(&mut self) -> Result<u32> {
        Ok(self.read_int_n(4, false)? as u32)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.check_eos(n)?;
        let ret = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(ret)
    }

    pub fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match tag {
            LIST_EMPTY => Ok(0),
            LIST_8 => Ok(self.read_byte()? as usize),
            LIST_16 => Ok(self.read_int16()? as usize),
            other => Err(ProtocolError::InvalidListTag(other)),
        }
    }

    /// Length of a raw blob introduced by one of the `BINARY_*` tags.
    fn read_binary_len(&mut self, tag: u8) -> Result<Option<usize>> {
        Ok(match tag {
            BINARY_8 => Some(self.read_byte()? as usize),
            BINARY_20 => Some(self.read_int20()? as usize),
            BINARY_32 => Some(self.read_int32()? as usize),
            _ => None,
        })
    }

    /// Decode a string introduced by `tag`. `Ok(None)` is the absent value.
    pub fn read_string(&mut self, tag: u8) -> Result<Option<String>> {
        if (SINGLE_BYTE_MIN..=SINGLE_BYTE_MAX).contains(&tag) {
            let token = tokens::single_byte_token(tag)?;
            let token = if token == USER_SERVER {
                USER_SERVER_ALIAS
            } else {
                token
            };
            return Ok(Some(token.to_string()));
        }

        match tag {
            DICTIONARY_0..=DICTIONARY_3 => {
                let index = self.read_byte()?;
                Ok(Some(
                    tokens::double_byte_token(tag - DICTIONARY_0, index)?.to_string(),
                ))
            }
            LIST_EMPTY => Ok(None),
            BINARY_8 | BINARY_20 | BINARY_32 => {
                let len = self.read_binary_len(tag)?.unwrap_or_default();
                let raw = self.read_bytes(len)?;
                String::from_utf8(raw.to_vec())
                    .map(Some)
                    .map_err(|_| ProtocolError::InvalidUtf8)
            }
            JID_PAIR => {
                let left_tag = self.jid_part_tag()?;
                let left = self.read_string(left_tag)?.unwrap_or_default();
                let right_tag = self.jid_part_tag()?;
                let right = self
                    .read_string(right_tag)?
                    .ok_or(ProtocolError::InvalidJidPair)?;
                Ok(Some(format!("{left}@{right}")))
            }
            NIBBLE_8 | HEX_8 => self.read_packed8(tag).map(Some),
            other => Err(ProtocolError::InvalidStringTag(other)),
        }
    }

    /// Tag of one half of a JID pair; halves never nest another pair.
    fn jid_part_tag(&mut self) -> Result<u8> {
        match self.read_byte()? {
            JID_PAIR => Err(ProtocolError::InvalidJidPair),
            tag => Ok(tag),
        }
    }

    fn read_packed8(&mut self, tag: u8) -> Result<String> {
        let start = self.read_byte()?;
        let count = (start & 0x7f) as usize;
        let mut ret = String::with_capacity(count * 2);
        for _ in 0..count {
            let byte = self.read_byte()?;
            ret.push(unpack(tag, byte >> 4)?);
            ret.push(unpack(tag, byte & 0x0f)?);
        }
        if start >> 7 != 0 {
            ret.pop();
        }
        Ok(ret)
    }

    fn read_attributes(&mut self, n: usize) -> Result<Vec<(String, String)>> {
        let mut attrs: Vec<(String, String)> = Vec::with_capacity(n);
        for _ in 0..n {
            let key_tag = self.read_byte()?;
            let key = self.read_string(key_tag)?.ok_or(ProtocolError::InvalidNode)?;
            let value_tag = self.read_byte()?;
            let value = self.read_string(value_tag)?;
            if attrs.iter().any(|(k, _)| *k == key) {
                return Err(ProtocolError::DuplicateAttribute(key));
            }
            // The writer never emits absent values, so they read as missing.
            if let Some(value) = value {
                attrs.push((key, value));
            }
        }
        Ok(attrs)
    }

    fn read_list(&mut self, tag: u8, depth: usize) -> Result<Vec<Node>> {
        let size = self.read_list_size(tag)?;
        let mut ret = Vec::with_capacity(size.min(self.data.len() - self.index));
        for _ in 0..size {
            ret.push(self.read_node_at(depth)?);
        }
        Ok(ret)
    }

    /// Decode one node; children deeper than [`MAX_DEPTH`] are rejected.
    pub fn read_node(&mut self) -> Result<Node> {
        self.read_node_at(1)
    }

    fn read_node_at(&mut self, depth: usize) -> Result<Node> {
        if depth > MAX_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_DEPTH));
        }
        let size_tag = self.read_byte()?;
        let list_size = self.read_list_size(size_tag)?;
        let descr_tag = self.read_byte()?;
        if descr_tag == STREAM_END {
            return Err(ProtocolError::UnexpectedStreamEnd);
        }

        let descr = self.read_string(descr_tag)?;
        let descr = match descr {
            Some(d) if list_size != 0 => d,
            _ => return Err(ProtocolError::InvalidNode),
        };

        let attrs = self.read_attributes((list_size - 1) / 2)?;
        if list_size % 2 == 1 {
            return Ok(Node::from_parts(descr, attrs, NodeContent::None));
        }

        let tag = self.read_byte()?;
        let content = if is_list_tag(tag) {
            NodeContent::Nodes(self.read_list(tag, depth + 1)?)
        } else if let Some(len) = self.read_binary_len(tag)? {
            NodeContent::Bytes(self.read_bytes(len)?.to_vec())
        } else {
            match self.read_string(tag)? {
                Some(s) => NodeContent::Text(s),
                None => NodeContent::None,
            }
        };

        Ok(Node::from_parts(descr, attrs, content))
    }
}

fn unpack(tag: u8, value: u8) -> Result<char> {
    match (tag, value) {
        (_, 0..=9) => Ok((b'0' + value) as char),
        (NIBBLE_8, 10) => Ok('-'),
        (NIBBLE_8, 11) => Ok('.'),
        (NIBBLE_8, 15) => Ok('\0'),
        (HEX_8, 10..=15) => Ok((b'A' + value - 10) as char),
        _ => Err(ProtocolError::InvalidNibble(value)),
    }
}
