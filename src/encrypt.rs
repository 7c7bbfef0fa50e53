//! 加密流程实现
//!
//! 加密流程（严格顺序）：
//! 1. 规范化密码，生成 salt，通过 KDF 派生密钥（仅一次）
//! 2. （可选）压缩明文流
//! 3. 对每个明文 chunk：生成 nonce、加密、生成 header，输出 `header || 密文`
//!    - 首个 chunk 输出完整 Header
//!    - 之后的 chunk 输出 SimpleHeader，仅记录与上一个 nonce 的差值
//!
//! 整个流程是惰性的：下游每请求一次才加密一个 chunk，不缓冲整个输入。

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::algorithm::{CryptoAlgorithm, DEFAULT_CRYPTO_ALGORITHM};
use crate::chunk::{self, InputChunk, Password};
use crate::compress::{self, CompressAlgorithm, CompressOptions};
use crate::crypto::kdf::{self, Argon2Backend, KeyDerivationOptions, RustArgon2};
use crate::crypto::nonce::NonceState;
use crate::error::{ArchiveError, Result};
use crate::format::header::{self, HeaderData, SimpleHeaderData};

/// 加密参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptOptions {
    pub algorithm: CryptoAlgorithm,
    pub key_derivation: KeyDerivationOptions,
    pub compress: Option<CompressOptions>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_CRYPTO_ALGORITHM,
            key_derivation: KeyDerivationOptions::default(),
            compress: None,
        }
    }
}

impl EncryptOptions {
    pub fn validate(&self) -> Result<()> {
        self.key_derivation.validate()?;
        if let Some(compress) = &self.compress {
            compress.validate()?;
        }
        Ok(())
    }
}

/// 流式加密器
pub struct Encryptor {
    options: EncryptOptions,
    backend: Arc<dyn Argon2Backend>,
}

impl Encryptor {
    pub fn new(options: EncryptOptions) -> Self {
        Self {
            options,
            backend: Arc::new(RustArgon2),
        }
    }

    /// 注入 Argon2 实现
    pub fn with_argon2_backend(mut self, backend: Arc<dyn Argon2Backend>) -> Self {
        self.backend = backend;
        self
    }

    /// 派生密钥并返回惰性的归档字节流
    pub fn encrypt_iter<'a, I>(&self, source: I, password: impl Into<InputChunk>) -> Result<EncryptIter<'a>>
    where
        I: Iterator<Item = Result<InputChunk>> + 'a,
    {
        self.options.validate()?;
        let password = Password::new(password)?;

        let algorithm = self.options.algorithm;
        let key_derivation = self.options.key_derivation;
        let salt = kdf::generate_salt(key_derivation.salt_length());
        let key = kdf::derive_key(
            self.backend.as_ref(),
            password.as_bytes(),
            &salt,
            &key_derivation,
            algorithm.key_length(),
        )?;

        let cleartext = chunk::normalize(source);
        let source: Box<dyn Iterator<Item = Result<Bytes>> + 'a> = match &self.options.compress {
            Some(options) => Box::new(compress::compress(cleartext, options)),
            None => Box::new(cleartext),
        };

        debug!(
            algorithm = algorithm.name(),
            compress = self.options.compress.map(|c| c.algorithm().name()),
            "encryption started"
        );

        Ok(EncryptIter {
            source,
            algorithm,
            key,
            salt,
            key_derivation,
            compress_algorithm: self.options.compress.map(|c| c.algorithm()),
            nonce_state: NonceState::new(),
            prev_nonce: None,
            chunk_index: 0,
            done: false,
        })
    }
}

/// 惰性产出 `header || 密文` 的迭代器
pub struct EncryptIter<'a> {
    source: Box<dyn Iterator<Item = Result<Bytes>> + 'a>,
    algorithm: CryptoAlgorithm,
    key: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    key_derivation: KeyDerivationOptions,
    compress_algorithm: Option<CompressAlgorithm>,
    nonce_state: NonceState,
    prev_nonce: Option<Vec<u8>>,
    chunk_index: u64,
    done: bool,
}

impl EncryptIter<'_> {
    fn encrypt_chunk(&mut self, cleartext: &[u8]) -> Result<Bytes> {
        let nonce = self.nonce_state.create(self.algorithm.nonce_length())?;
        let encrypted = self.algorithm.encrypt(&self.key, &nonce, cleartext)?;
        let ciphertext_len = encrypted.ciphertext.len();

        let header = match &self.prev_nonce {
            None => header::create_header(
                &HeaderData {
                    crypto_algorithm: self.algorithm,
                    nonce: nonce.clone(),
                    auth_tag: encrypted.auth_tag,
                    key_length: self.algorithm.key_length() as u32,
                    key_salt: self.salt.clone(),
                    key_derivation_options: self.key_derivation,
                    compress_algorithm: self.compress_algorithm,
                },
                ciphertext_len,
            )?,
            Some(prev) => header::create_simple_header(
                &SimpleHeaderData {
                    nonce_diff: NonceState::get_diff(prev, &nonce)?,
                    auth_tag: encrypted.auth_tag,
                },
                ciphertext_len,
            )?,
        };

        trace!(
            chunk = self.chunk_index,
            header_len = header.len(),
            ciphertext_len,
            "chunk encrypted"
        );

        let mut out = header;
        out.extend_from_slice(&encrypted.ciphertext);
        self.prev_nonce = Some(nonce);
        self.chunk_index += 1;
        Ok(Bytes::from(out))
    }
}

impl Iterator for EncryptIter<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = loop {
            match self.source.next() {
                None => {
                    self.done = true;
                    debug!(chunks = self.chunk_index, "encryption finished");
                    return None;
                }
                Some(Ok(cleartext)) if cleartext.is_empty() => continue,
                Some(Ok(cleartext)) => break self.encrypt_chunk(&cleartext),
                Some(Err(e)) => break Err(e),
            }
        };

        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

/// 一次性加密，返回完整归档
pub fn encrypt(
    cleartext: impl Into<InputChunk>,
    password: impl Into<InputChunk>,
    options: &EncryptOptions,
) -> Result<Vec<u8>> {
    let source = std::iter::once(Ok::<_, ArchiveError>(cleartext.into()));
    let mut out = Vec::new();
    for chunk in Encryptor::new(*options).encrypt_iter(source, password)? {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
