#![no_main]

use libfuzzer_sys::fuzz_target;
use wa_web_protocol::{NodeReader, NodeWriter};

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic; anything that decodes must re-encode and
    // decode to the same tree.
    if let Ok(node) = NodeReader::decode(data) {
        if let Ok(bytes) = NodeWriter::encode(&node) {
            assert_eq!(NodeReader::decode(&bytes).ok(), Some(node));
        }
    }
});
