//! Session crypto primitives.
//!
//! Pure functions over byte slices: X25519 agreement, shared-secret
//! expansion, HMAC-SHA256 with constant-time verification and AES-256-CBC
//! with PKCS#7 padding. Key generation and randomness come from a
//! [`KeyProvider`] so tests can pin them.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block and IV size.
pub const IV_LEN: usize = 16;
/// Length of the expanded shared secret.
pub const EXPANDED_SECRET_LEN: usize = 80;

/// Source of randomness and ephemeral keys.
pub trait KeyProvider: Send {
    /// Fill `dest` with cryptographically secure random bytes.
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<()>;

    /// Generate a fresh X25519 keypair.
    fn generate_keypair(&mut self) -> Result<EphemeralKeyPair> {
        let mut secret = Zeroizing::new([0u8; 32]);
        self.fill_random(&mut secret[..])?;
        Ok(EphemeralKeyPair::from_secret_bytes(*secret))
    }

    fn random_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.fill_random(&mut out)?;
        Ok(out)
    }
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeyProvider;

impl KeyProvider for OsKeyProvider {
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<()> {
        getrandom::fill(dest).map_err(|e| ProtocolError::Random(e.to_string()))
    }
}

/// X25519 keypair owned by one handshake attempt.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        self.public.as_bytes()
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// X25519 agreement between our secret and the peer's public key.
pub fn derive_shared_secret(
    local: &EphemeralKeyPair,
    remote_public: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let shared = local.secret.diffie_hellman(&PublicKey::from(*remote_public));
    Zeroizing::new(shared.to_bytes())
}

/// Expand a raw agreement into 80 bytes of key material.
///
/// `seed = HMAC-SHA256(0^32, raw)` followed by the HKDF expand stage with an
/// empty info string.
pub fn expand_shared_secret(raw: &[u8]) -> Result<Zeroizing<[u8; EXPANDED_SECRET_LEN]>> {
    let seed = Zeroizing::new(hmac_sha256(&[0u8; 32], raw)?);
    let hk = Hkdf::<Sha256>::from_prk(&seed[..])
        .map_err(|_| ProtocolError::InvalidKeyMaterial("HKDF seed too short".into()))?;
    let mut okm = Zeroizing::new([0u8; EXPANDED_SECRET_LEN]);
    hk.expand(&[], &mut okm[..])
        .map_err(|_| ProtocolError::InvalidKeyMaterial("HKDF expansion failed".into()))?;
    Ok(okm)
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
    hmac_sha256_parts(key, &[message])
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| ProtocolError::InvalidKeyMaterial("HMAC key".into()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time equality; slices of different length are unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Check `expected_mac` against the HMAC of `parts` under `key`.
pub fn verify_hmac(key: &[u8], parts: &[&[u8]], expected_mac: &[u8]) -> Result<()> {
    let computed = hmac_sha256_parts(key, parts)?;
    if constant_time_eq(&computed, expected_mac) {
        Ok(())
    } else {
        Err(ProtocolError::HmacMismatch {
            expected: hex::encode(expected_mac),
            actual: hex::encode(computed),
        })
    }
}

/// Decrypt `IV ∥ ciphertext` with AES-256-CBC and strip PKCS#7 padding.
pub fn aes_cbc_decrypt(key: &[u8], iv_and_ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv_and_ciphertext.len() < IV_LEN * 2 {
        return Err(ProtocolError::DecryptionFailure);
    }
    let (iv, ciphertext) = iv_and_ciphertext.split_at(IV_LEN);
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKeyMaterial("AES key must be 32 bytes".into()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Encrypt with AES-256-CBC and PKCS#7 padding; returns `IV ∥ ciphertext`.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKeyMaterial("AES key must be 32 bytes".into()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
