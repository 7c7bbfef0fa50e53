//! AES-256-GCM 加解密算法

use aes_gcm::{
    Aes256Gcm, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};

use crate::error::{ArchiveError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const NAME: &str = "aes-256-gcm";

/// 加密单个 chunk，返回 `(ciphertext, auth_tag)`
///
/// 调用方负责保证 nonce 长度为 `NONCE_SIZE`。
pub fn encrypt_chunk(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| ArchiveError::Cipher { algorithm: NAME })?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer)
        .map_err(|_| ArchiveError::Cipher { algorithm: NAME })?;

    Ok((buffer, tag.to_vec()))
}

/// 解密单个 chunk
///
/// 认证失败时不会返回任何明文。
pub fn decrypt_chunk(key: &[u8], nonce: &[u8], auth_tag: &[u8], mut ciphertext: Vec<u8>) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| ArchiveError::Cipher { algorithm: NAME })?;

    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut ciphertext,
            Tag::from_slice(auth_tag),
        )
        .map_err(|_| ArchiveError::Authentication)?;

    Ok(ciphertext)
}
