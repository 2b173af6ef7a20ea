//! Envelope encryption for caller api keys. A write seals the caller's key
//! so the async index worker can use it later; the AAD binds the sealed
//! payload to one specific (tenant, project, path, updated_at) write and
//! makes replay against any other tuple a decryption failure.

use std::collections::BTreeMap;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use uuid::Uuid;

const ENVELOPE_PREFIX: &str = "v1";
const NONCE_BYTES: usize = 12;
const MIN_KEK_BYTES: usize = 16;
const DEK_CONTEXT: &str = "fileio 2026-06 credential envelope dek";

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("no encryption keys configured")]
    NoKeys,
    #[error("encryption key {0} is too short")]
    WeakKey(u32),
    #[error("payload references unknown key id {0}")]
    UnknownKek(u32),
    #[error("payload is malformed")]
    Malformed,
    #[error("payload integrity check failed")]
    Integrity,
}

/// Symmetric envelope cipher over a set of numbered key-encryption keys.
/// Encryption always picks the numerically largest KEK id so key rotation
/// is a config change; decryption honors the id carried in the payload.
pub struct EnvelopeCipher {
    keks: BTreeMap<u32, Vec<u8>>,
}

impl EnvelopeCipher {
    pub fn new(keks: BTreeMap<u32, Vec<u8>>) -> Result<Self, EnvelopeError> {
        if keks.is_empty() {
            return Err(EnvelopeError::NoKeys);
        }
        for (id, secret) in &keks {
            if secret.len() < MIN_KEK_BYTES {
                return Err(EnvelopeError::WeakKey(*id));
            }
        }
        Ok(Self { keks })
    }

    /// Seal `plaintext` against `aad`. Output form:
    /// `v1:<kek_id>:<dek_id hex>:<b64 nonce||ciphertext>`.
    pub fn encrypt(&self, plaintext: &str, aad: &str) -> Result<String, EnvelopeError> {
        let (kek_id, kek_secret) = self.keks.iter().next_back().ok_or(EnvelopeError::NoKeys)?;

        use aes_gcm::aead::rand_core::RngCore as _;
        let dek_id = Uuid::new_v4();
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&derive_dek(kek_secret, dek_id.as_bytes()))
            .map_err(|_| EnvelopeError::WeakKey(*kek_id))?;
        let ciphertext = cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| EnvelopeError::Integrity)?;

        let mut sealed = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!(
            "{ENVELOPE_PREFIX}:{kek_id}:{}:{}",
            dek_id.simple(),
            BASE64_STANDARD.encode(sealed)
        ))
    }

    /// Open a sealed payload under `aad`. Any tamper, truncation, wrong
    /// key or wrong AAD comes back as `Integrity`/`Malformed`, never as a
    /// partially decrypted value.
    pub fn decrypt(&self, payload: &str, aad: &str) -> Result<String, EnvelopeError> {
        let mut parts = payload.splitn(4, ':');
        let (prefix, kek_id, dek_id, sealed) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(k), Some(d), Some(s)) => (p, k, d, s),
            _ => return Err(EnvelopeError::Malformed),
        };
        if prefix != ENVELOPE_PREFIX {
            return Err(EnvelopeError::Malformed);
        }
        let kek_id: u32 = kek_id.parse().map_err(|_| EnvelopeError::Malformed)?;
        let kek_secret = self
            .keks
            .get(&kek_id)
            .ok_or(EnvelopeError::UnknownKek(kek_id))?;
        let dek_id = Uuid::try_parse(dek_id).map_err(|_| EnvelopeError::Malformed)?;
        let sealed = BASE64_STANDARD
            .decode(sealed)
            .map_err(|_| EnvelopeError::Malformed)?;
        if sealed.len() <= NONCE_BYTES {
            return Err(EnvelopeError::Malformed);
        }

        let cipher = Aes256Gcm::new_from_slice(&derive_dek(kek_secret, dek_id.as_bytes()))
            .map_err(|_| EnvelopeError::Malformed)?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_BYTES);
        let plaintext = cipher
            .decrypt(
                nonce.into(),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| EnvelopeError::Integrity)?;
        String::from_utf8(plaintext).map_err(|_| EnvelopeError::Malformed)
    }
}

// one derived AES key per envelope; the random dek id keeps nonce reuse
// across envelopes a non-issue even under the same KEK
fn derive_dek(kek_secret: &[u8], dek_id: &[u8]) -> [u8; 32] {
    let mut material = Vec::with_capacity(kek_secret.len() + dek_id.len());
    material.extend_from_slice(kek_secret);
    material.extend_from_slice(dek_id);
    blake3::derive_key(DEK_CONTEXT, &material)
}
