//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::VecDeque;
use wa_web_protocol::protocol::handshake::SessionKeys;
use wa_web_protocol::utils::crypto::{self, EphemeralKeyPair, KeyProvider};
use wa_web_protocol::Result;

/// Client ephemeral secret: bytes 1..=32.
pub fn client_secret() -> [u8; 32] {
    std::array::from_fn(|i| i as u8 + 1)
}

/// Server ephemeral secret: bytes 33..=64.
pub fn server_secret() -> [u8; 32] {
    std::array::from_fn(|i| i as u8 + 33)
}

pub fn enc_key() -> [u8; 32] {
    std::array::from_fn(|i| i as u8 + 0x40)
}

pub fn mac_key() -> [u8; 32] {
    std::array::from_fn(|i| i as u8 + 0x60)
}

pub fn server_keys() -> SessionKeys {
    SessionKeys::new(enc_key(), mac_key())
}

pub const CLIENT_ID: &str = "qqqqqqqqqqqqqqqqqqqqqg==";

/// Hands out queued byte strings in order, then zeros.
pub struct ScriptedProvider {
    chunks: VecDeque<Vec<u8>>,
}

impl ScriptedProvider {
    /// Client id of sixteen 0xAA bytes followed by [`client_secret`].
    pub fn handshake() -> Self {
        Self {
            chunks: VecDeque::from(vec![vec![0xAA; 16], client_secret().to_vec()]),
        }
    }
}

impl KeyProvider for ScriptedProvider {
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<()> {
        match self.chunks.pop_front() {
            Some(chunk) => dest.copy_from_slice(&chunk[..dest.len()]),
            None => dest.fill(0),
        }
        Ok(())
    }
}

/// Build the `Conn` secret blob a server would send for `client_public`.
pub fn seal_secret_blob(client_public: &[u8; 32], keys: &[u8]) -> Vec<u8> {
    let server = EphemeralKeyPair::from_secret_bytes(server_secret());
    let shared = crypto::derive_shared_secret(&server, client_public);
    let sse = crypto::expand_shared_secret(&shared[..]).unwrap();

    let mut iv = [0u8; 16];
    iv.copy_from_slice(&sse[64..80]);
    let sealed = crypto::aes_cbc_encrypt(&sse[..32], &iv, keys).unwrap();
    let ciphertext = &sealed[16..];
    let mac = crypto::hmac_sha256_parts(&sse[32..64], &[&server.public_key()[..], ciphertext]).unwrap();

    let mut blob = server.public_key().to_vec();
    blob.extend_from_slice(&mac);
    blob.extend_from_slice(ciphertext);
    blob
}

/// Secret blob carrying [`enc_key`] and [`mac_key`], base64 encoded.
pub fn secret_b64() -> String {
    let client = EphemeralKeyPair::from_secret_bytes(client_secret());
    let mut keys = [0u8; 64];
    keys[..32].copy_from_slice(&enc_key());
    keys[32..].copy_from_slice(&mac_key());
    STANDARD.encode(seal_secret_blob(client.public_key(), &keys))
}

pub fn conn_json(secret: &str) -> String {
    format!(
        r#"s1,["Conn",{{"clientToken":"ct","serverToken":"st","browserToken":"bt","secret":"{secret}","wid":"5730000000@c.us"}}]"#
    )
}
