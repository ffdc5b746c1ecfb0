// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WhatsApp Flow envelope encryption.
//!
//! Inbound requests carry an AES-128 key wrapped with RSA-OAEP (SHA-256 for
//! both the hash and MGF1), the AES-GCM ciphertext with its 16-byte tag
//! appended, and a 16-byte IV. The response is encrypted with the same key
//! under the bitwise complement of the request IV.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, AeadInPlace, KeyInit},
    aes::Aes128,
    AesGcm,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pkcs8::DecodePrivateKey;
use rsa::{pkcs1::DecodeRsaPrivateKey, Oaep, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use utoipa::ToSchema;

/// AES-128-GCM with the 16-byte nonce WhatsApp uses.
type FlowCipher = AesGcm<Aes128, U16>;

const AES_KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("decryption failed: {0}")]
    Decryption(&'static str),

    #[error("decrypted payload is not valid JSON")]
    MalformedPayload,

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Encrypted body posted by WhatsApp to a Flow endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EncryptedEnvelope {
    /// Base64 RSA-OAEP wrapped AES key.
    pub encrypted_aes_key: String,
    /// Base64 AES-GCM ciphertext with the tag appended.
    pub encrypted_flow_data: String,
    /// Base64 16-byte IV.
    pub initial_vector: String,
}

/// Plaintext request plus the key material needed to answer it.
#[derive(Debug, Clone)]
pub struct DecryptedRequest {
    pub body: Value,
    pub aes_key: Vec<u8>,
    pub initial_vector: Vec<u8>,
}

/// The server's Flow private key.
pub struct FlowPrivateKey {
    key: RsaPrivateKey,
}

impl FlowPrivateKey {
    /// Load a PEM key. With a passphrase the PEM must be an encrypted PKCS#8
    /// document; without one both PKCS#8 and PKCS#1 are accepted.
    pub fn from_pem(pem: &str, passphrase: Option<&str>) -> Result<Self, CipherError> {
        let key = match passphrase {
            Some(passphrase) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?,
            None => RsaPrivateKey::from_pkcs8_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                .map_err(|e| CipherError::InvalidKey(e.to_string()))?,
        };
        Ok(Self { key })
    }

    pub fn from_key(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    fn unwrap_aes_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CipherError::Decryption("AES key unwrap failed"))
    }
}

impl std::fmt::Debug for FlowPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FlowPrivateKey(..)")
    }
}

/// Bitwise complement of every IV byte.
pub fn flip_iv(initial_vector: &[u8]) -> Vec<u8> {
    initial_vector.iter().map(|byte| !byte).collect()
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    if value.trim().is_empty() {
        return Err(CipherError::InvalidEnvelope(format!("{name} is empty")));
    }
    STANDARD
        .decode(value.trim())
        .map_err(|_| CipherError::InvalidEnvelope(format!("{name} is not valid base64")))
}

fn build_cipher(aes_key: &[u8]) -> Result<FlowCipher, CipherError> {
    if aes_key.len() != AES_KEY_LEN {
        return Err(CipherError::Decryption("unexpected AES key length"));
    }
    FlowCipher::new_from_slice(aes_key).map_err(|_| CipherError::Decryption("unexpected AES key length"))
}

/// Unwrap, authenticate and parse an inbound envelope.
pub fn decrypt_envelope(
    envelope: &EncryptedEnvelope,
    private_key: &FlowPrivateKey,
) -> Result<DecryptedRequest, CipherError> {
    let wrapped_key = decode_field("encrypted_aes_key", &envelope.encrypted_aes_key)?;
    let flow_data = decode_field("encrypted_flow_data", &envelope.encrypted_flow_data)?;
    let initial_vector = decode_field("initial_vector", &envelope.initial_vector)?;

    if initial_vector.len() != IV_LEN {
        return Err(CipherError::Decryption("unexpected IV length"));
    }
    if flow_data.len() < TAG_LEN {
        return Err(CipherError::Decryption("ciphertext shorter than tag"));
    }

    let aes_key = private_key.unwrap_aes_key(&wrapped_key)?;
    let cipher = build_cipher(&aes_key)?;

    let (body, tag) = flow_data.split_at(flow_data.len() - TAG_LEN);
    let mut plaintext = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&initial_vector),
            b"",
            &mut plaintext,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::Decryption("authentication tag mismatch"))?;

    let body: Value =
        serde_json::from_slice(&plaintext).map_err(|_| CipherError::MalformedPayload)?;

    Ok(DecryptedRequest {
        body,
        aes_key,
        initial_vector,
    })
}

/// Encrypt a response for the request that produced `aes_key` and `initial_vector`.
pub fn encrypt_response<T: Serialize>(
    response: &T,
    aes_key: &[u8],
    initial_vector: &[u8],
) -> Result<String, CipherError> {
    if initial_vector.len() != IV_LEN {
        return Err(CipherError::Encryption("unexpected IV length".to_string()));
    }
    let cipher = build_cipher(aes_key).map_err(|e| CipherError::Encryption(e.to_string()))?;
    let flipped = flip_iv(initial_vector);

    let mut buffer =
        serde_json::to_vec(response).map_err(|e| CipherError::Encryption(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&flipped), b"", &mut buffer)
        .map_err(|_| CipherError::Encryption("AES-GCM encryption failed".to_string()))?;
    buffer.extend_from_slice(&tag);

    Ok(STANDARD.encode(buffer))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use super::*;
    use rand::RngCore;
    use rsa::RsaPublicKey;

    pub fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate RSA key")
        })
    }

    pub fn flow_key() -> FlowPrivateKey {
        FlowPrivateKey::from_key(test_key().clone())
    }

    /// Build an envelope the way the WhatsApp client does.
    pub fn seal_request(body: &Value, aes_key: &[u8], initial_vector: &[u8]) -> EncryptedEnvelope {
        let mut rng = rand::thread_rng();
        let public_key = RsaPublicKey::from(test_key());
        let wrapped = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), aes_key)
            .expect("wrap key");

        let cipher = FlowCipher::new_from_slice(aes_key).expect("cipher");
        let mut buffer = serde_json::to_vec(body).expect("serialize");
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(initial_vector), b"", &mut buffer)
            .expect("encrypt");
        buffer.extend_from_slice(&tag);

        EncryptedEnvelope {
            encrypted_aes_key: STANDARD.encode(wrapped),
            encrypted_flow_data: STANDARD.encode(buffer),
            initial_vector: STANDARD.encode(initial_vector),
        }
    }

    /// Decrypt a server response as the WhatsApp client does.
    pub fn open_response(encoded: &str, aes_key: &[u8], request_iv: &[u8]) -> Value {
        let raw = STANDARD.decode(encoded).expect("base64");
        let (body, tag) = raw.split_at(raw.len() - TAG_LEN);
        let cipher = FlowCipher::new_from_slice(aes_key).expect("cipher");
        let mut plaintext = body.to_vec();
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&flip_iv(request_iv)),
                b"",
                &mut plaintext,
                GenericArray::from_slice(tag),
            )
            .expect("response decrypts under flipped IV");
        serde_json::from_slice(&plaintext).expect("response json")
    }

    pub fn random_key_and_iv() -> ([u8; 16], [u8; 16]) {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        (key, iv)
    }
}
