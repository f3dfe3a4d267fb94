//! QR pairing handshake and authenticated frame sealing.
//!
//! The server answers `admin/init` with a `ref`; the client shows
//! `"{ref},{base64(publicKey)},{clientId}"` as a QR code and the phone sends
//! back a `Conn` payload whose `secret` blob is laid out as
//!
//! ```text
//! secret := serverPublicKey[32] ∥ hmac[32] ∥ encryptedKeys[..]
//! ```
//!
//! [`establish_session`] turns that blob into the [`SessionKeys`] protecting
//! every later binary frame. Per-handshake material lives in owned values
//! handed through the flow, never in globals, and key bytes are zeroed on drop.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{self, EphemeralKeyPair, KeyProvider, EXPANDED_SECRET_LEN, IV_LEN};
use crate::utils::metrics::Timer;
use tracing::{debug, instrument, warn};

/// Minimum accepted length of the `Conn` secret blob.
pub const MIN_SECRET_LEN: usize = 96;
/// Random bytes behind a client id.
pub const CLIENT_ID_LEN: usize = 16;
pub const MAC_LEN: usize = 32;
const KEY_LEN: usize = 32;

/// Identity material for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMaterial {
    pub client_id: String,
    pub server_ref: Option<String>,
}

impl HandshakeMaterial {
    pub fn generate<P: KeyProvider + ?Sized>(provider: &mut P) -> Result<Self> {
        Ok(Self {
            client_id: generate_client_id(provider)?,
            server_ref: None,
        })
    }
}

/// 16 random bytes, base64 encoded.
pub fn generate_client_id<P: KeyProvider + ?Sized>(provider: &mut P) -> Result<String> {
    let bytes = provider.random_bytes(CLIENT_ID_LEN)?;
    Ok(STANDARD.encode(bytes))
}

/// Text to render as the pairing QR code.
pub fn qr_payload(server_ref: &str, public_key: &[u8; 32], client_id: &str) -> String {
    format!("{server_ref},{},{client_id}", STANDARD.encode(public_key))
}

/// Body of the `["Conn", {...}]` control frame.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnPayload {
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub server_token: Option<String>,
    #[serde(default)]
    pub browser_token: Option<String>,
    pub secret: String,
    #[serde(default)]
    pub wid: Option<String>,
}

impl ConnPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            ProtocolError::HandshakeAborted(format!("Malformed Conn payload: {e}"))
        })
    }
}

/// Server-issued connection state. Secret fields are redacted from `Debug`.
pub struct ConnectionOpts {
    pub client_token: Option<String>,
    pub server_token: Option<String>,
    pub browser_token: Option<String>,
    /// The account JID
    pub identity: Option<String>,
    secret_blob: Zeroizing<Vec<u8>>,
    shared_secret_raw: Zeroizing<[u8; 32]>,
    shared_secret_expanded: Zeroizing<[u8; EXPANDED_SECRET_LEN]>,
}

impl ConnectionOpts {
    pub fn secret_blob(&self) -> &[u8] {
        &self.secret_blob
    }

    pub fn shared_secret_raw(&self) -> &[u8; 32] {
        &self.shared_secret_raw
    }

    pub fn shared_secret_expanded(&self) -> &[u8; EXPANDED_SECRET_LEN] {
        &self.shared_secret_expanded
    }
}

impl fmt::Debug for ConnectionOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOpts")
            .field("identity", &self.identity)
            .field("secret_blob_len", &self.secret_blob.len())
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}

/// Symmetric keys for authenticated frames.
pub struct SessionKeys {
    enc_key: Zeroizing<[u8; KEY_LEN]>,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
}

impl SessionKeys {
    pub fn new(enc_key: [u8; KEY_LEN], mac_key: [u8; KEY_LEN]) -> Self {
        Self {
            enc_key: Zeroizing::new(enc_key),
            mac_key: Zeroizing::new(mac_key),
        }
    }

    pub fn enc_key(&self) -> &[u8; KEY_LEN] {
        &self.enc_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_LEN] {
        &self.mac_key
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}

/// Derive session keys from the `Conn` payload.
///
/// Steps, each failing fast:
/// 1. keep the tokens and identity verbatim
/// 2. base64-decode `secret`; its first 32 bytes are the server public key
/// 3. X25519 with our ephemeral secret
/// 4. expand the agreement to 80 bytes (`sse`)
/// 5. `HMAC(sse[32..64], secret[..32] ∥ secret[64..]) == secret[32..64]`
/// 6. AES-CBC decrypt `sse[64..80] ∥ secret[64..]` under `sse[..32]`
/// 7. split the 64 decrypted bytes into `encKey ∥ macKey`
///
/// A MAC mismatch returns `HmacMismatch` before any decryption is attempted.
#[instrument(skip_all, fields(identity = payload.wid.as_deref()))]
pub fn establish_session(
    keypair: &EphemeralKeyPair,
    payload: &ConnPayload,
) -> Result<(ConnectionOpts, SessionKeys)> {
    let _timer = Timer::start("establish_session");
    let secret_blob = Zeroizing::new(STANDARD.decode(payload.secret.as_bytes())?);
    if secret_blob.len() < MIN_SECRET_LEN {
        return Err(ProtocolError::HandshakeAborted(
            constants::ERR_SECRET_TOO_SHORT.into(),
        ));
    }

    let mut server_public = [0u8; 32];
    server_public.copy_from_slice(&secret_blob[..32]);

    let shared_secret_raw = crypto::derive_shared_secret(keypair, &server_public);
    let sse = crypto::expand_shared_secret(&shared_secret_raw[..])?;
    debug!("Shared secret expanded");

    crypto::verify_hmac(
        &sse[32..64],
        &[&secret_blob[..32], &secret_blob[64..]],
        &secret_blob[32..64],
    )?;
    debug!("Secret blob authenticated");

    let mut keys_encrypted = Zeroizing::new(Vec::with_capacity(16 + secret_blob.len() - 64));
    keys_encrypted.extend_from_slice(&sse[64..80]);
    keys_encrypted.extend_from_slice(&secret_blob[64..]);

    let keys_decrypted = Zeroizing::new(crypto::aes_cbc_decrypt(&sse[..32], &keys_encrypted)?);
    if keys_decrypted.len() != 2 * KEY_LEN {
        warn!(len = keys_decrypted.len(), "{}", constants::ERR_KEYS_LENGTH);
        return Err(ProtocolError::DecryptionFailure);
    }

    let mut enc_key = [0u8; KEY_LEN];
    let mut mac_key = [0u8; KEY_LEN];
    enc_key.copy_from_slice(&keys_decrypted[..KEY_LEN]);
    mac_key.copy_from_slice(&keys_decrypted[KEY_LEN..]);
    let keys = SessionKeys::new(enc_key, mac_key);
    zeroize::Zeroize::zeroize(&mut enc_key);
    zeroize::Zeroize::zeroize(&mut mac_key);

    let opts = ConnectionOpts {
        client_token: payload.client_token.clone(),
        server_token: payload.server_token.clone(),
        browser_token: payload.browser_token.clone(),
        identity: payload.wid.clone(),
        secret_blob,
        shared_secret_raw,
        shared_secret_expanded: sse,
    };

    debug!("Session keys derived");
    Ok((opts, keys))
}

/// Verify and decrypt the content of an authenticated binary frame.
///
/// `content` is everything after the tag delimiter: `mac[32] ∥ iv[16] ∥ ct`.
pub fn decrypt_frame(keys: &SessionKeys, content: &[u8]) -> Result<Vec<u8>> {
    if content.len() < MAC_LEN {
        return Err(ProtocolError::InvalidFrame(
            constants::ERR_FRAME_TOO_SHORT.into(),
        ));
    }
    let (mac, ciphertext) = content.split_at(MAC_LEN);
    crypto::verify_hmac(keys.mac_key(), &[ciphertext], mac)?;
    crypto::aes_cbc_decrypt(keys.enc_key(), ciphertext)
}

/// Inverse of [`decrypt_frame`]: returns `mac ∥ iv ∥ ct`.
pub fn encrypt_frame(keys: &SessionKeys, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ciphertext = crypto::aes_cbc_encrypt(keys.enc_key(), iv, plaintext)
        .map_err(|_| ProtocolError::EncryptionFailure)?;
    let mac = crypto::hmac_sha256(keys.mac_key(), &ciphertext)?;
    let mut sealed = Vec::with_capacity(MAC_LEN + ciphertext.len());
    sealed.extend_from_slice(&mac);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_B64: &str = "WGmv9FBUlzLLqu1eXfmzCm2jHLDldCutWtShp2jxpnv+b5nXhOP6Jt12pyzssOFjcrNOFNy4UC9nyTw7skhxYZ1wOkMVEoJSTJ60YWmNvAi+rXT6lks7eAzYnlw7yXduOWjYVbv80aBkiEgPzzM1eQ+wb1izpkX9vfXsB695Xk5b0IchkJrPQizBDH9LZspW";

    fn client_keypair() -> EphemeralKeyPair {
        let mut secret = [0u8; 32];
        for (i, b) in secret.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        EphemeralKeyPair::from_secret_bytes(secret)
    }

    fn payload(secret: &str) -> ConnPayload {
        ConnPayload {
            client_token: Some("ct".into()),
            server_token: Some("st".into()),
            browser_token: Some("bt".into()),
            secret: secret.into(),
            wid: Some("5730000000@c.us".into()),
        }
    }

    #[test]
    fn test_establish_session_derives_keys() {
        let (opts, keys) = establish_session(&client_keypair(), &payload(SECRET_B64)).unwrap();
        let expected_enc: Vec<u8> = (0x40..0x60).collect();
        let expected_mac: Vec<u8> = (0x60..0x80).collect();
        assert_eq!(&keys.enc_key()[..], &expected_enc[..]);
        assert_eq!(&keys.mac_key()[..], &expected_mac[..]);
        assert_eq!(opts.identity.as_deref(), Some("5730000000@c.us"));
        assert_eq!(opts.secret_blob().len(), 144);
    }

    #[test]
    fn test_tampered_blob_fails_hmac() {
        let mut blob = STANDARD.decode(SECRET_B64).unwrap();
        blob[100] ^= 0x01;
        let err = establish_session(&client_keypair(), &payload(&STANDARD.encode(blob)))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HmacMismatch { .. }));
    }

    #[test]
    fn test_short_blob_aborts() {
        let err = establish_session(&client_keypair(), &payload(&STANDARD.encode([0u8; 95])))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeAborted(_)));
    }

    #[test]
    fn test_bad_base64() {
        let err = establish_session(&client_keypair(), &payload("***")).unwrap_err();
        assert!(matches!(err, ProtocolError::Base64(_)));
    }

    #[test]
    fn test_frame_seal_and_open() {
        let keys = SessionKeys::new([0x40; 32], [0x60; 32]);
        let sealed = encrypt_frame(&keys, &[7u8; IV_LEN], &[0xf8, 0x01, 0x09]).unwrap();
        assert_eq!(sealed.len(), MAC_LEN + IV_LEN + 16);
        assert_eq!(decrypt_frame(&keys, &sealed).unwrap(), vec![0xf8, 0x01, 0x09]);

        let mut tampered = sealed.clone();
        tampered[MAC_LEN + IV_LEN] ^= 0x80;
        assert!(matches!(
            decrypt_frame(&keys, &tampered),
            Err(ProtocolError::HmacMismatch { .. })
        ));
        assert!(matches!(
            decrypt_frame(&keys, &sealed[..10]),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_qr_payload_layout() {
        let kp = client_keypair();
        let qr = qr_payload("1@abc", kp.public_key(), "Y2xpZW50");
        assert_eq!(
            qr,
            "1@abc,B6N8vBQgk8i3VdwbEOhstCY3StFqqFPtC9/AsrhtHHw=,Y2xpZW50"
        );
    }

    #[test]
    fn test_conn_payload_from_json() {
        let value = serde_json::json!({
            "clientToken": "c", "serverToken": "s", "browserToken": "b",
            "secret": "AAAA", "wid": "1@c.us", "sharedSecret": null
        });
        let parsed = ConnPayload::from_value(value).unwrap();
        assert_eq!(parsed.client_token.as_deref(), Some("c"));
        assert_eq!(parsed.wid.as_deref(), Some("1@c.us"));
        assert!(matches!(
            ConnPayload::from_value(serde_json::json!({"wid": "x"})),
            Err(ProtocolError::HandshakeAborted(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let keys = SessionKeys::new([1; 32], [2; 32]);
        assert_eq!(format!("{keys:?}"), "SessionKeys([REDACTED])");
    }
}
