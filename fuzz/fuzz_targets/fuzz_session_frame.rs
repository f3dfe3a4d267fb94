#![no_main]

use libfuzzer_sys::fuzz_target;
use wa_web_protocol::config::ClientConfig;
use wa_web_protocol::protocol::WireFrame;
use wa_web_protocol::utils::OsKeyProvider;
use wa_web_protocol::Session;

fuzz_target!(|data: &[u8]| {
    // Arbitrary server frames during the handshake must never panic.
    let mut session = Session::new(ClientConfig::default(), OsKeyProvider);
    if session.open().is_err() {
        return;
    }
    let frame = match std::str::from_utf8(data) {
        Ok(text) => WireFrame::Text(text.to_string()),
        Err(_) => WireFrame::Binary(bytes::Bytes::copy_from_slice(data)),
    };
    let _ = session.handle_frame(&frame);
});
