use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, WalletError};

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;

/// The `{encryptedKey, iv}` pair stored on a wallet record.
/// `encrypted_key` is base64(salt || ciphertext), `iv` is base64(nonce).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub encrypted_key: String,
    pub iv: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let params = Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| WalletError::Crypto(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| WalletError::Crypto(format!("argon2 derive: {e}")))?;
    Ok(key)
}

pub fn seal_secret(secret: &str, password: &str) -> Result<SealedSecret> {
    if password.is_empty() {
        return Err(WalletError::Validation("password is required to seal a secret".into()));
    }
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), secret.as_bytes())
        .map_err(|e| WalletError::Crypto(format!("encrypt: {e}")))?;

    let mut blob = Vec::with_capacity(SALT_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&ciphertext);
    Ok(SealedSecret {
        encrypted_key: general_purpose::STANDARD.encode(blob),
        iv: general_purpose::STANDARD.encode(nonce),
    })
}

pub fn open_secret(encrypted_key: &str, iv: &str, password: &str) -> Result<Zeroizing<String>> {
    if password.is_empty() {
        return Err(WalletError::Validation("password is required to open a secret".into()));
    }
    let blob = general_purpose::STANDARD
        .decode(encrypted_key)
        .map_err(|e| WalletError::Crypto(format!("decode encrypted key: {e}")))?;
    let nonce = general_purpose::STANDARD
        .decode(iv)
        .map_err(|e| WalletError::Crypto(format!("decode iv: {e}")))?;
    if nonce.len() != NONCE_LEN {
        return Err(WalletError::Crypto("iv length invalid".into()));
    }
    if blob.len() <= SALT_LEN {
        return Err(WalletError::Crypto("encrypted key too short".into()));
    }
    let (salt, ciphertext) = blob.split_at(SALT_LEN);

    let key = derive_key(password, salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext)
            .map_err(|_| {
                WalletError::Crypto("decrypt failed: wrong password or corrupt secret".into())
            })?,
    );
    let secret = String::from_utf8(plaintext.to_vec())
        .map_err(|_| WalletError::Crypto("secret is not utf-8".into()))?;
    Ok(Zeroizing::new(secret))
}

/// Argon2 PHC string kept as the record's password verification hash.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WalletError::Crypto(format!("hash password: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| WalletError::Crypto(format!("parse password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
