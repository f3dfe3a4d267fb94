//! Property-based tests using proptest
//!
//! Codec invariants over randomly generated node trees and inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::BTreeMap;
use wa_web_protocol::protocol::handshake::{decrypt_frame, encrypt_frame, SessionKeys};
use wa_web_protocol::{Node, NodeContent, NodeReader, NodeWriter};

/// Strings mixing tokens, JIDs, packable runs and free text.
fn wire_string() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("c.us".to_string()),
        Just("s.whatsapp.net".to_string()),
        prop::sample::select(vec!["action", "message", "true", "before", "g.us", "relay"])
            .prop_map(str::to_string),
        "[0-9]{1,20}@(c\\.us|g\\.us|s\\.whatsapp\\.net|broadcast)",
        "[0-9A-F]{1,12}",
        "[0-9.-]{1,12}",
        "[a-zA-Z0-9 @._-]{0,24}",
    ]
}

fn leaf() -> impl Strategy<Value = Node> {
    (
        "[a-z]{1,10}",
        prop::collection::btree_map("[a-z]{1,6}", wire_string(), 0..4),
        prop_oneof![
            Just(NodeContent::None),
            wire_string().prop_map(NodeContent::Text),
            prop::collection::vec(any::<u8>(), 0..300).prop_map(NodeContent::Bytes),
        ],
    )
        .prop_map(|(tag, attrs, content)| build(tag, attrs, content))
}

fn build(tag: String, attrs: BTreeMap<String, String>, content: NodeContent) -> Node {
    let mut node = Node::new(tag).with_content(content);
    for (k, v) in attrs {
        node.set_attr(k, v);
    }
    node
}

fn node_tree() -> impl Strategy<Value = Node> {
    leaf().prop_recursive(3, 32, 6, |inner| {
        (
            "[a-z]{1,10}",
            prop::collection::btree_map("[a-z]{1,6}", wire_string(), 0..3),
            prop::collection::vec(inner, 0..6),
        )
            .prop_map(|(tag, attrs, children)| build(tag, attrs, NodeContent::Nodes(children)))
    })
}

// Property: decode(encode(node)) == node for unique attribute keys
proptest! {
    #[test]
    fn prop_node_roundtrip(node in node_tree()) {
        let bytes = NodeWriter::encode(&node).expect("encode");
        let decoded = NodeReader::decode(&bytes).expect("decode");
        prop_assert_eq!(decoded, node);
    }
}

// Property: encoding is deterministic and stable under a round trip
proptest! {
    #[test]
    fn prop_encoding_deterministic(node in node_tree()) {
        let first = NodeWriter::encode(&node).expect("encode");
        let second = NodeWriter::encode(&NodeReader::decode(&first).expect("decode")).expect("encode");
        prop_assert_eq!(first, second);
    }
}

// Property: arbitrary bytes never panic the reader
proptest! {
    #[test]
    fn prop_reader_total(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = NodeReader::decode(&data);
    }
}

// Property: authenticated frames open with the sealing keys and nothing else
proptest! {
    #[test]
    fn prop_frame_seal_open(
        enc in any::<[u8; 32]>(),
        mac in any::<[u8; 32]>(),
        iv in any::<[u8; 16]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        flip in any::<prop::sample::Index>(),
    ) {
        let keys = SessionKeys::new(enc, mac);
        let sealed = encrypt_frame(&keys, &iv, &plaintext).expect("seal");
        prop_assert_eq!(decrypt_frame(&keys, &sealed).expect("open"), plaintext);

        let mut tampered = sealed.clone();
        let i = flip.index(tampered.len());
        tampered[i] ^= 0x01;
        prop_assert!(decrypt_frame(&keys, &tampered).is_err());
    }
}
