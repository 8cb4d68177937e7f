use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

/// Event decryption and request signing for the chat platform's callbacks.
pub struct AesCipher {
    encrypt_key: String,
    key: [u8; 32],
}

impl AesCipher {
    pub fn new(encrypt_key: &str) -> Self {
        AesCipher {
            encrypt_key: encrypt_key.to_string(),
            key: Sha256::digest(encrypt_key.as_bytes()).into(),
        }
    }

    /// `encrypted` is base64 of a 16 byte IV followed by AES-256-CBC data.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let combined = BASE64
            .decode(encrypted)
            .map_err(|e| anyhow!("Failed to decode base64: {}", e))?;
        if combined.len() <= IV_LEN {
            return Err(anyhow!("Encrypted payload too short"));
        }

        let (iv, ciphertext) = combined.split_at(IV_LEN);
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| anyhow!("Failed to decrypt event: {}", e))?;

        String::from_utf8(plaintext)
            .map_err(|e| anyhow!("Failed to convert decrypted bytes to string: {}", e))
    }

    /// Hex SHA-256 of `timestamp + nonce + encrypt_key + body`.
    pub fn signature(&self, timestamp: &str, nonce: &str, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.as_bytes());
        hasher.update(nonce.as_bytes());
        hasher.update(self.encrypt_key.as_bytes());
        hasher.update(body.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
pub(crate) fn encrypt_for_test(encrypt_key: &str, plaintext: &str) -> String {
    use aes::cipher::BlockEncryptMut;
    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    let key: [u8; 32] = Sha256::digest(encrypt_key.as_bytes()).into();
    let iv = [7u8; IV_LEN];
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    let mut combined = iv.to_vec();
    combined.extend_from_slice(&ciphertext);
    BASE64.encode(combined)
}
