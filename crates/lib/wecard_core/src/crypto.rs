//! Webhook signature verification and envelope encryption.
//!
//! The platform signs callbacks with `sha1(sort([token, timestamp, nonce, body]))`
//! and encrypts bodies with AES-256-CBC, IV = first 16 key bytes. Plaintext layout:
//!
//! ```text
//! [16 random bytes][u32 BE length N][N bytes message][receiver id]
//! ```
//!
//! padded PKCS#7-style to a 32-byte block.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// AES-256 key size (32 bytes).
const KEY_SIZE: usize = 32;
/// CBC IV size; the IV is the key prefix.
const IV_SIZE: usize = 16;
/// Random prefix in the plaintext buffer.
const RANDOM_PREFIX: usize = 16;
/// Length field following the random prefix.
const LENGTH_FIELD: usize = 4;
/// Padding block used by the platform (not the AES block size).
const PAD_BLOCK: usize = 32;

/// Key decoder: the platform's 43-char keys may carry non-zero trailing bits.
const AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Envelope and signature errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Signature mismatch")]
    Signature,

    #[error("Base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid AES key: expected {KEY_SIZE} bytes, got {0}")]
    InvalidKey(usize),

    #[error("Ciphertext is not a whole number of blocks")]
    Cipher,

    #[error("Invalid padding")]
    Padding,

    #[error("Length field exceeds buffer")]
    Length,

    #[error("Message is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed XML envelope: {0}")]
    Xml(String),
}

/// A decrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    pub message: String,
    /// Suite id or corp id the message was addressed to.
    pub receiver_id: String,
}

// =============================================================================
// Signature
// =============================================================================

/// Compute the lowercase-hex SHA-1 signature over the sorted four-tuple.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str, data: &str) -> String {
    let mut parts = [token, timestamp, nonce, data];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// JS-SDK `wx.config` signature: SHA-1 over the fixed-order query string.
pub fn jsapi_signature(ticket: &str, noncestr: &str, timestamp: &str, url: &str) -> String {
    let plain = format!("jsapi_ticket={ticket}&noncestr={noncestr}&timestamp={timestamp}&url={url}");
    format!("{:x}", Sha1::digest(plain.as_bytes()))
}

/// Check `signature` against the recomputed one in constant time.
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    data: &str,
    signature: &str,
) -> bool {
    let expected = compute_signature(token, timestamp, nonce, data);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

// =============================================================================
// AES envelope
// =============================================================================

/// Decode the 43-character key (a `=` is appended before decoding).
fn decode_aes_key(aes_key_b64_no_padding: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = AES_KEY_ENGINE.decode(format!("{aes_key_b64_no_padding}="))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(bytes.len()))
}

/// Decrypt an envelope, returning only the message.
pub fn decrypt(ciphertext_b64: &str, aes_key_b64_no_padding: &str) -> Result<String, CryptoError> {
    decrypt_envelope(ciphertext_b64, aes_key_b64_no_padding).map(|opened| opened.message)
}

/// Decrypt an envelope, returning the message and its receiver id.
pub fn decrypt_envelope(
    ciphertext_b64: &str,
    aes_key_b64_no_padding: &str,
) -> Result<OpenedEnvelope, CryptoError> {
    let key = decode_aes_key(aes_key_b64_no_padding)?;
    let mut buf = STANDARD.decode(ciphertext_b64.trim())?;
    if buf.is_empty() {
        return Err(CryptoError::Cipher);
    }

    let cipher = Aes256CbcDec::new_from_slices(&key, &key[..IV_SIZE])
        .map_err(|_| CryptoError::InvalidKey(key.len()))?;
    let plain = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::Cipher)?;

    let content = strip_padding(plain)?;
    if content.len() < RANDOM_PREFIX + LENGTH_FIELD {
        return Err(CryptoError::Length);
    }

    let mut len_bytes = [0u8; LENGTH_FIELD];
    len_bytes.copy_from_slice(&content[RANDOM_PREFIX..RANDOM_PREFIX + LENGTH_FIELD]);
    let msg_len = u32::from_be_bytes(len_bytes) as usize;

    let start = RANDOM_PREFIX + LENGTH_FIELD;
    let end = start.checked_add(msg_len).ok_or(CryptoError::Length)?;
    if end > content.len() {
        return Err(CryptoError::Length);
    }

    Ok(OpenedEnvelope {
        message: String::from_utf8(content[start..end].to_vec())?,
        receiver_id: String::from_utf8(content[end..].to_vec())?,
    })
}

/// Encrypt `message` for `receiver_id`; the structural inverse of [`decrypt_envelope`].
pub fn encrypt(
    message: &str,
    receiver_id: &str,
    aes_key_b64_no_padding: &str,
) -> Result<String, CryptoError> {
    let key = decode_aes_key(aes_key_b64_no_padding)?;
    let msg_len = u32::try_from(message.len()).map_err(|_| CryptoError::Length)?;

    let mut random = [0u8; RANDOM_PREFIX];
    rand::rng().fill_bytes(&mut random);

    let mut buf =
        Vec::with_capacity(RANDOM_PREFIX + LENGTH_FIELD + message.len() + receiver_id.len() + PAD_BLOCK);
    buf.extend_from_slice(&random);
    buf.extend_from_slice(&msg_len.to_be_bytes());
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(receiver_id.as_bytes());

    let pad = PAD_BLOCK - (buf.len() % PAD_BLOCK);
    buf.resize(buf.len() + pad, pad as u8);

    let len = buf.len();
    let cipher = Aes256CbcEnc::new_from_slices(&key, &key[..IV_SIZE])
        .map_err(|_| CryptoError::InvalidKey(key.len()))?;
    let encrypted = cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| CryptoError::Cipher)?;

    Ok(STANDARD.encode(encrypted))
}

/// Strip the trailing pad; the last byte is the pad length (1..=32).
fn strip_padding(plain: &[u8]) -> Result<&[u8], CryptoError> {
    let pad = *plain.last().ok_or(CryptoError::Padding)? as usize;
    if pad == 0 || pad > PAD_BLOCK || pad > plain.len() {
        return Err(CryptoError::Padding);
    }
    let (content, padding) = plain.split_at(plain.len() - pad);
    if padding.iter().any(|&b| b as usize != pad) {
        return Err(CryptoError::Padding);
    }
    Ok(content)
}

// =============================================================================
// XML envelope
// =============================================================================

#[derive(Debug, Deserialize)]
struct EncryptedEnvelope {
    #[serde(rename = "Encrypt")]
    encrypt: Option<String>,
}

/// Extract the `<Encrypt>` payload from a POSTed callback body.
pub fn parse_encrypted_envelope(body: &str) -> Result<String, CryptoError> {
    let envelope: EncryptedEnvelope =
        quick_xml::de::from_str(body).map_err(|e| CryptoError::Xml(e.to_string()))?;
    envelope
        .encrypt
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CryptoError::Xml("missing Encrypt element".into()))
}
