//! ChaCha20-Poly1305 加解密算法

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};

use crate::error::{ArchiveError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const NAME: &str = "chacha20-poly1305";

pub fn encrypt_chunk(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() != KEY_SIZE {
        return Err(ArchiveError::Cipher { algorithm: NAME });
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer)
        .map_err(|_| ArchiveError::Cipher { algorithm: NAME })?;

    Ok((buffer, tag.to_vec()))
}

pub fn decrypt_chunk(key: &[u8], nonce: &[u8], auth_tag: &[u8], mut ciphertext: Vec<u8>) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(ArchiveError::Cipher { algorithm: NAME });
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

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
