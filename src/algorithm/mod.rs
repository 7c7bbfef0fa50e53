//! AEAD 算法模块。
//!
//! 统一管理可选算法、算法名称与 header 中的枚举值，具体实现见子模块。

pub mod aes_256_gcm;
pub mod chacha20_poly1305;

use std::fmt;
use std::str::FromStr;

use crate::error::{ArchiveError, Result};
use crate::format::proto;

/// 支持的 AEAD 算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// 加密结果：密文与分离的认证标签
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub ciphertext: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

impl CryptoAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    pub fn key_length(self) -> usize {
        match self {
            Self::Aes256Gcm => aes_256_gcm::KEY_SIZE,
            Self::ChaCha20Poly1305 => chacha20_poly1305::KEY_SIZE,
        }
    }

    pub fn nonce_length(self) -> usize {
        match self {
            Self::Aes256Gcm => aes_256_gcm::NONCE_SIZE,
            Self::ChaCha20Poly1305 => chacha20_poly1305::NONCE_SIZE,
        }
    }

    pub fn auth_tag_length(self) -> usize {
        match self {
            Self::Aes256Gcm => aes_256_gcm::TAG_SIZE,
            Self::ChaCha20Poly1305 => chacha20_poly1305::TAG_SIZE,
        }
    }

    pub fn encrypt(self, key: &[u8], nonce: &[u8], cleartext: &[u8]) -> Result<Encrypted> {
        self.check_nonce(nonce)?;

        let (ciphertext, auth_tag) = match self {
            Self::Aes256Gcm => aes_256_gcm::encrypt_chunk(key, nonce, cleartext)?,
            Self::ChaCha20Poly1305 => chacha20_poly1305::encrypt_chunk(key, nonce, cleartext)?,
        };

        Ok(Encrypted {
            ciphertext,
            auth_tag,
        })
    }

    /// 解密并校验认证标签
    ///
    /// 标签不匹配（密码错误或数据被篡改）返回 `ArchiveError::Authentication`。
    pub fn decrypt(
        self,
        key: &[u8],
        nonce: &[u8],
        auth_tag: &[u8],
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.check_nonce(nonce)?;
        if auth_tag.len() != self.auth_tag_length() {
            return Err(ArchiveError::HeaderMismatch(format!(
                "{} auth tag must be {} bytes, got {}",
                self.name(),
                self.auth_tag_length(),
                auth_tag.len()
            )));
        }

        match self {
            Self::Aes256Gcm => aes_256_gcm::decrypt_chunk(key, nonce, auth_tag, ciphertext),
            Self::ChaCha20Poly1305 => {
                chacha20_poly1305::decrypt_chunk(key, nonce, auth_tag, ciphertext)
            }
        }
    }

    pub(crate) fn to_proto(self) -> proto::CryptoAlgorithm {
        match self {
            Self::Aes256Gcm => proto::CryptoAlgorithm::Aes256Gcm,
            Self::ChaCha20Poly1305 => proto::CryptoAlgorithm::Chacha20Poly1305,
        }
    }

    pub(crate) fn from_proto(value: proto::CryptoAlgorithm) -> Self {
        match value {
            proto::CryptoAlgorithm::Aes256Gcm => Self::Aes256Gcm,
            proto::CryptoAlgorithm::Chacha20Poly1305 => Self::ChaCha20Poly1305,
        }
    }

    fn check_nonce(self, nonce: &[u8]) -> Result<()> {
        if nonce.len() != self.nonce_length() {
            return Err(ArchiveError::HeaderMismatch(format!(
                "{} nonce must be {} bytes, got {}",
                self.name(),
                self.nonce_length(),
                nonce.len()
            )));
        }
        Ok(())
    }
}

impl FromStr for CryptoAlgorithm {
    type Err = ArchiveError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            _ => Err(ArchiveError::UnknownAlgorithm {
                kind: "crypto algorithm",
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for CryptoAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 默认算法：ChaCha20-Poly1305。
pub const DEFAULT_CRYPTO_ALGORITHM: CryptoAlgorithm = CryptoAlgorithm::ChaCha20Poly1305;
