//! Symmetric encryption for the on-disk secret cache
//!
//! AES-256-CBC with PKCS#7 padding. The key is derived from the service
//! account token and a per-write random salt with scrypt, so brute forcing a
//! stolen cache file is expensive. The initialization vector is fixed and
//! supplied out of band (`OP_CACHE_IV`).

use crate::error::{Error, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the derived key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the initialization vector in bytes (one AES block)
pub const IV_SIZE: usize = 16;

/// Size of the random salt in bytes, before hex encoding
pub const SALT_SIZE: usize = 16;

/// Default scrypt cost as log2(N). N = 16384, r = 8, p = 1.
pub const DEFAULT_KDF_COST: u8 = 14;

const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// A derived encryption key, zeroed on drop
pub struct DerivedKey(Zeroizing<[u8; KEY_SIZE]>);

impl DerivedKey {
    fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Encrypts and decrypts cache payloads with a fixed IV
#[derive(Debug, Clone)]
pub struct CryptoBox {
    iv: [u8; IV_SIZE],
    params: scrypt::Params,
}

impl CryptoBox {
    /// Create a crypto box with the default key derivation cost
    pub fn new(iv: [u8; IV_SIZE]) -> Result<Self> {
        Self::with_cost(iv, DEFAULT_KDF_COST)
    }

    /// Create a crypto box with an explicit scrypt cost (log2 N).
    ///
    /// Writer and reader must agree on the cost, otherwise every cache
    /// file decrypts as corrupt.
    pub fn with_cost(iv: [u8; IV_SIZE], log_n: u8) -> Result<Self> {
        let params = scrypt::Params::new(log_n, SCRYPT_R, SCRYPT_P, KEY_SIZE)
            .map_err(|e| Error::Crypto(format!("Invalid scrypt parameters: {}", e)))?;
        Ok(Self { iv, params })
    }

    /// Derive a key from a secret and a salt.
    ///
    /// Deliberately slow. Call it from a blocking context.
    pub fn derive_key(&self, secret: &str, salt: &str) -> Result<DerivedKey> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        scrypt::scrypt(secret.as_bytes(), salt.as_bytes(), &self.params, &mut key[..])
            .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(DerivedKey(key))
    }

    /// Encrypt plaintext, returning hex-encoded ciphertext
    pub fn encrypt(&self, plaintext: &str, key: &DerivedKey) -> Result<String> {
        let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &self.iv)
            .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(hex::encode(ciphertext))
    }

    /// Decrypt hex-encoded ciphertext.
    ///
    /// Every failure is `CacheCorrupt`: a wrong key, a rotated IV and a
    /// truncated file are indistinguishable here.
    pub fn decrypt(&self, ciphertext_hex: &str, key: &DerivedKey) -> Result<String> {
        let ciphertext = hex::decode(ciphertext_hex.trim())
            .map_err(|e| Error::cache_corrupt(format!("ciphertext is not hex: {}", e)))?;

        let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &self.iv)
            .map_err(|e| Error::cache_corrupt(format!("failed to create cipher: {}", e)))?;

        let mut plaintext = Zeroizing::new(
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| Error::cache_corrupt("decryption failed (wrong key, IV or padding)"))?,
        );

        String::from_utf8(std::mem::take(&mut *plaintext))
            .map_err(|_| Error::cache_corrupt("decrypted payload is not valid UTF-8"))
    }
}

/// Generate a fresh salt as a hex string
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Generate a fresh initialization vector as a hex string
pub fn generate_iv_hex() -> String {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);
    hex::encode(iv)
}

/// Parse a hex-encoded initialization vector
pub fn parse_iv(value: &str) -> std::result::Result<[u8; IV_SIZE], String> {
    let bytes = hex::decode(value.trim()).map_err(|e| format!("not valid hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", IV_SIZE, b.len()))
}
