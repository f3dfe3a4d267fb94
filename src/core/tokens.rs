//! Structural tags and token dictionaries of the binary node format.
//!
//! Indices are part of the wire contract and must never be reordered.

use crate::error::{ProtocolError, Result};

/// Empty list; also encodes an absent string.
pub const LIST_EMPTY: u8 = 0;
/// Peer closed the logical stream.
pub const STREAM_END: u8 = 2;
/// First of the four double-byte dictionary pages.
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
/// List with an 8-bit entry count.
pub const LIST_8: u8 = 248;
/// List with a 16-bit entry count.
pub const LIST_16: u8 = 249;
/// `user@server` pair of two nested strings.
pub const JID_PAIR: u8 = 250;
/// Packed run of `0-9A-F`.
pub const HEX_8: u8 = 251;
/// Raw bytes with an 8-bit length.
pub const BINARY_8: u8 = 252;
/// Raw bytes with a 20-bit length.
pub const BINARY_20: u8 = 253;
/// Raw bytes with a 32-bit length.
pub const BINARY_32: u8 = 254;
/// Packed run of `0-9`, `-` and `.`.
pub const NIBBLE_8: u8 = 255;

/// Lowest tag that may address a single-byte token.
pub const SINGLE_BYTE_MIN: u8 = 3;
/// Highest tag that may address a single-byte token.
pub const SINGLE_BYTE_MAX: u8 = DICTIONARY_0 - 1;
/// Maximum number of characters in one packed run.
pub const PACKED_MAX: usize = 254;
/// Deepest node nesting either side of the codec accepts.
pub const MAX_DEPTH: usize = 64;

/// Token the reader rewrites to [`USER_SERVER_ALIAS`].
pub const USER_SERVER: &str = "s.whatsapp.net";
/// Compatibility alias for the user server.
pub const USER_SERVER_ALIAS: &str = "c.us";

/// Single-byte token space. Slots 0..=2 belong to structural tags.
pub static SINGLE_BYTE_TOKENS: &[&str] = &[
    "", "", "", "200", "400", "404", "500", "501", "502", "action", "add", "after", "archive",
    "author", "available", "battery", "before", "body", "broadcast", "chat", "clear", "code",
    "composing", "contacts", "count", "create", "debug", "delete", "demote", "duplicate",
    "encoding", "error", "false", "filehash", "from", "g.us", "group", "groups_v2", "height",
    "id", "image", "in", "index", "invis", "item", "jid", "kind", "last", "leave", "live", "log",
    "media", "message", "mimetype", "missing", "modify", "name", "notification", "notify", "out",
    "owner", "participant", "paused", "picture", "played", "presence", "preview", "promote",
    "query", "raw", "read", "receipt", "received", "recipient", "recording", "relay", "remove",
    "response", "resume", "retry", "s.whatsapp.net", "seconds", "set", "size", "status",
    "subject", "subscribe", "t", "text", "to", "true", "type", "unarchive", "unavailable", "url",
    "user", "value", "web", "width", "mute", "read_only", "admin", "creator", "short", "update",
    "powersave", "checksum", "epoch", "block", "previous", "409", "replaced", "reason", "spam",
    "modify_tag", "message_info", "delivery", "emoji", "title", "description", "canonical-url",
    "matched-text", "star", "unstar", "media_key", "filename", "identity", "unread", "page",
    "page_count", "search", "media_message", "security", "call_log", "profile", "ciphertext",
    "invite", "gif", "vcard", "frequent", "privacy", "blacklist", "whitelist", "verify",
    "location", "document", "elapsed", "revoke_invite", "expiration", "unsubscribe", "disable",
    "vname", "old_jid", "new_jid", "announcement", "locked", "prop", "label", "color", "call",
    "offer", "call-id", "quick_reply", "sticker", "pay_t", "accept", "reject", "sticker_pack",
    "invalid", "canceled", "missed", "connected", "result", "audio", "video", "recent",
];

/// Double-byte token space, addressed as `256 * page + index`.
///
/// The web protocol revision targeted here ships no double-byte tokens, so
/// every dictionary lookup is out of range.
pub static DOUBLE_BYTE_TOKENS: &[&str] = &[];

/// Look up a single-byte token by its tag value.
pub fn single_byte_token(index: u8) -> Result<&'static str> {
    let idx = index as usize;
    if index < SINGLE_BYTE_MIN || idx >= SINGLE_BYTE_TOKENS.len() {
        return Err(ProtocolError::TokenIndexOutOfRange(idx));
    }
    Ok(SINGLE_BYTE_TOKENS[idx])
}

/// Look up a double-byte token from its dictionary page and in-page index.
pub fn double_byte_token(page: u8, index: u8) -> Result<&'static str> {
    let n = 256 * page as usize + index as usize;
    DOUBLE_BYTE_TOKENS
        .get(n)
        .copied()
        .ok_or(ProtocolError::TokenIndexOutOfRange(n))
}

/// Tag value of a single-byte token, if the string is one.
pub fn single_byte_index(token: &str) -> Option<u8> {
    SINGLE_BYTE_TOKENS
        .iter()
        .skip(SINGLE_BYTE_MIN as usize)
        .position(|t| *t == token)
        .map(|pos| pos as u8 + SINGLE_BYTE_MIN)
}

/// Whether `tag` introduces a list.
#[inline]
pub fn is_list_tag(tag: u8) -> bool {
    matches!(tag, LIST_EMPTY | LIST_8 | LIST_16)
}
