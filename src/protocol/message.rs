//! Frame shapes exchanged with the server.
//!
//! Every frame is `"{tag},{content}"`. Text frames carry JSON content;
//! binary frames carry an ASCII tag followed by `mac ∥ iv ∥ ciphertext`.
//! The server answers keepalive probes with a bare `!{timestamp}`.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{constants, ProtocolError, Result};

/// Liveness probe sent every keepalive interval.
pub const KEEPALIVE_FRAME: &str = "?,,";

const TAG_DELIMITER: u8 = b',';
const PONG_PREFIX: char = '!';

/// One websocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(s) => s.len(),
            WireFrame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireFrame::Text(s) => Some(s),
            WireFrame::Binary(_) => None,
        }
    }
}

/// A frame split at its first comma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFrame {
    pub tag: String,
    pub content: Bytes,
    pub binary: bool,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Keepalive answer, carrying the server timestamp.
    Pong(String),
    Tagged(TaggedFrame),
}

impl Inbound {
    pub fn parse(frame: &WireFrame) -> Result<Self> {
        match frame {
            WireFrame::Text(text) => {
                if let Some(ts) = text.strip_prefix(PONG_PREFIX) {
                    if !text.contains(',') {
                        return Ok(Inbound::Pong(ts.to_string()));
                    }
                }
                let (tag, content) = text
                    .split_once(TAG_DELIMITER as char)
                    .ok_or_else(|| ProtocolError::InvalidFrame(constants::ERR_NO_TAG.into()))?;
                Ok(Inbound::Tagged(TaggedFrame {
                    tag: tag.to_string(),
                    content: Bytes::copy_from_slice(content.as_bytes()),
                    binary: false,
                }))
            }
            WireFrame::Binary(bytes) => {
                let delim = bytes
                    .iter()
                    .position(|b| *b == TAG_DELIMITER)
                    .ok_or_else(|| ProtocolError::InvalidFrame(constants::ERR_NO_TAG.into()))?;
                let tag = std::str::from_utf8(&bytes[..delim])
                    .map_err(|_| ProtocolError::InvalidFrame("Binary tag is not UTF-8".into()))?;
                Ok(Inbound::Tagged(TaggedFrame {
                    tag: tag.to_string(),
                    content: bytes.slice(delim + 1..),
                    binary: true,
                }))
            }
        }
    }
}

/// A server-initiated JSON array frame `[name, payload, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Conn(Value),
    Stream(Value),
    Props(Value),
    Other { name: String, payload: Value },
}

impl ControlMessage {
    /// Interpret `value` as a control array; anything else is `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Array(mut items) = value else {
            return None;
        };
        let name = match items.first() {
            Some(Value::String(name)) => name.clone(),
            _ => return None,
        };
        let payload = if items.len() > 1 {
            items.swap_remove(1)
        } else {
            Value::Null
        };
        Some(match name.as_str() {
            "Conn" => ControlMessage::Conn(payload),
            "Stream" => ControlMessage::Stream(payload),
            "Props" => ControlMessage::Props(payload),
            _ => ControlMessage::Other { name, payload },
        })
    }

    /// Split into the control name and its payload.
    pub fn into_parts(self) -> (String, Value) {
        match self {
            ControlMessage::Conn(payload) => ("Conn".into(), payload),
            ControlMessage::Stream(payload) => ("Stream".into(), payload),
            ControlMessage::Props(payload) => ("Props".into(), payload),
            ControlMessage::Other { name, payload } => (name, payload),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ControlMessage::Conn(_) => "Conn",
            ControlMessage::Stream(_) => "Stream",
            ControlMessage::Props(_) => "Props",
            ControlMessage::Other { name, .. } => name,
        }
    }
}

/// `{tag},{json}` text frame.
pub fn text_frame(tag: &str, body: &Value) -> WireFrame {
    WireFrame::Text(format!("{tag},{body}"))
}

/// `admin/init` announcing the client version, browser and client id.
pub fn admin_init_frame(tag: &str, client: &ClientConfig, client_id: &str) -> WireFrame {
    let browser = &client.browser;
    text_frame(
        tag,
        &json!([
            "admin",
            "init",
            client.client_version,
            [browser.os, browser.name, browser.version],
            client_id,
            true
        ]),
    )
}

/// `{tag},` followed by raw `payload` bytes.
pub fn binary_frame(tag: &str, payload: &[u8]) -> WireFrame {
    let mut buf = BytesMut::with_capacity(tag.len() + 1 + payload.len());
    buf.put_slice(tag.as_bytes());
    buf.put_u8(TAG_DELIMITER);
    buf.put_slice(payload);
    WireFrame::Binary(buf.freeze())
}

pub fn keepalive_frame() -> WireFrame {
    WireFrame::Text(KEEPALIVE_FRAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_init_shape() {
        let frame = admin_init_frame("1700000000.--0", &ClientConfig::default(), "Y2xpZW50");
        assert_eq!(
            frame.as_text().unwrap(),
            r#"1700000000.--0,["admin","init",[0,4,315],["Windows","Chrome","10"],"Y2xpZW50",true]"#
        );
    }

    #[test]
    fn test_text_split_at_first_comma() {
        let parsed = Inbound::parse(&WireFrame::Text(r#"s1,["Conn",{"a":1}]"#.into())).unwrap();
        match parsed {
            Inbound::Tagged(frame) => {
                assert_eq!(frame.tag, "s1");
                assert_eq!(&frame.content[..], br#"["Conn",{"a":1}]"#);
                assert!(!frame.binary);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_binary_keeps_raw_content() {
        let frame = binary_frame("3EB0", &[0x2c, 0xff, 0x00]);
        match Inbound::parse(&frame).unwrap() {
            Inbound::Tagged(tagged) => {
                assert_eq!(tagged.tag, "3EB0");
                assert_eq!(&tagged.content[..], &[0x2c, 0xff, 0x00]);
                assert!(tagged.binary);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_pong_and_untagged() {
        assert_eq!(
            Inbound::parse(&WireFrame::Text("!1700000000".into())).unwrap(),
            Inbound::Pong("1700000000".into())
        );
        assert!(matches!(
            Inbound::parse(&WireFrame::Text("garbage".into())),
            Err(ProtocolError::InvalidFrame(_))
        ));
        assert!(Inbound::parse(&WireFrame::Binary(Bytes::from_static(b"nocomma"))).is_err());
    }

    #[test]
    fn test_control_message_names() {
        let conn = ControlMessage::from_value(json!(["Conn", {"wid": "1@c.us"}])).unwrap();
        assert_eq!(conn.name(), "Conn");
        assert!(matches!(conn, ControlMessage::Conn(ref v) if v["wid"] == "1@c.us"));

        let other = ControlMessage::from_value(json!(["Presence"])).unwrap();
        assert_eq!(
            other,
            ControlMessage::Other {
                name: "Presence".into(),
                payload: Value::Null
            }
        );

        assert!(ControlMessage::from_value(json!({"status": 200})).is_none());
        assert!(ControlMessage::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_keepalive_literal() {
        assert_eq!(keepalive_frame(), WireFrame::Text("?,,".into()));
    }
}
