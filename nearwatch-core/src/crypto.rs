//! Envelope encryption for subscriber email addresses at rest.
//!
//! Each value gets a fresh data key. The data key is sealed under the primary
//! master key and stored next to the ciphertext:
//!
//!   `{key_id}.{base64(nonce | wrapped data key)}.{base64(nonce | ciphertext)}`
//!
//! Older master keys stay in the ring for decryption, so rotating the primary
//! never strands existing rows as long as the old key is kept.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use nearwatch_shared::errors::{AppError, AppResult};

const NONCE_LEN: usize = 24;
const CONTENT_AAD: &[u8] = b"nearwatch-email";

/// Reversible at-rest protection for email addresses. Decryption never
/// errors: a blob that cannot be opened yields `None`.
pub trait EmailCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> AppResult<String>;

    fn decrypt(&self, blob: &str) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum KeyRingError {
    #[error("no encryption keys configured")]
    Empty,

    #[error("malformed key entry '{0}', expected id:base64key")]
    Malformed(String),

    #[error("key '{0}' must decode to 32 bytes")]
    BadKey(String),
}

struct MasterKey {
    id: String,
    key: Zeroizing<[u8; 32]>,
}

pub struct EnvelopeCipher {
    keys: Vec<MasterKey>,
}

impl EnvelopeCipher {
    /// Parse a comma-separated `id:base64key` list. The first entry is the
    /// primary key used for new values.
    pub fn from_key_list(list: &str) -> Result<Self, KeyRingError> {
        let mut keys = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, encoded) = entry
                .split_once(':')
                .ok_or_else(|| KeyRingError::Malformed(entry.to_string()))?;
            let id = id.trim();
            if id.is_empty() || id.contains('.') {
                return Err(KeyRingError::Malformed(entry.to_string()));
            }
            let raw = STANDARD
                .decode(encoded.trim())
                .map_err(|_| KeyRingError::BadKey(id.to_string()))?;
            let key: [u8; 32] = raw
                .try_into()
                .map_err(|_| KeyRingError::BadKey(id.to_string()))?;
            keys.push(MasterKey {
                id: id.to_string(),
                key: Zeroizing::new(key),
            });
        }
        if keys.is_empty() {
            return Err(KeyRingError::Empty);
        }
        Ok(Self { keys })
    }

    pub fn primary_key_id(&self) -> &str {
        &self.keys[0].id
    }

    fn key(&self, id: &str) -> Option<&MasterKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    fn open_blob(&self, blob: &str) -> Option<Zeroizing<Vec<u8>>> {
        let mut parts = blob.trim().splitn(3, '.');
        let (id, wrapped, sealed) = (parts.next()?, parts.next()?, parts.next()?);
        let master = self.key(id)?;

        let wrapped = STANDARD.decode(wrapped).ok()?;
        let data_key = open(&master.key[..], &wrapped, master.id.as_bytes())?;
        let sealed = STANDARD.decode(sealed).ok()?;
        open(&data_key, &sealed, CONTENT_AAD)
    }
}

fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, Payload { msg: plaintext, aad }).ok()?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Some(out)
}

fn open(key: &[u8], data: &[u8], aad: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_LEN {
        return None;
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .ok()
        .map(Zeroizing::new)
}

impl EmailCipher for EnvelopeCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let primary = &self.keys[0];
        let data_key = Zeroizing::new(XChaCha20Poly1305::generate_key(&mut OsRng).to_vec());

        let wrapped = seal(&primary.key[..], &data_key, primary.id.as_bytes())
            .ok_or_else(|| AppError::internal("failed to wrap data key"))?;
        let sealed = seal(&data_key, plaintext.as_bytes(), CONTENT_AAD)
            .ok_or_else(|| AppError::internal("failed to encrypt email"))?;

        Ok(format!(
            "{}.{}.{}",
            primary.id,
            STANDARD.encode(wrapped),
            STANDARD.encode(sealed)
        ))
    }

    fn decrypt(&self, blob: &str) -> Option<String> {
        let opened = self.open_blob(blob).and_then(|bytes| String::from_utf8(bytes.to_vec()).ok());
        if opened.is_none() {
            tracing::warn!(
                key_id = blob.split('.').next().unwrap_or_default(),
                "email blob could not be decrypted"
            );
        }
        opened
    }
}
