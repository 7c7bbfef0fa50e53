//! 解密流程实现
//!
//! 解密流程（严格顺序）：
//! 1. 规范化密码
//! 2. 读取并校验 CID（仅一次）
//! 3. 循环直到输入耗尽：
//!    - 首个 chunk：解析完整 Header，按其中的 salt 与 KDF 参数派生密钥
//!    - 之后的 chunk：解析 SimpleHeader，由上一个 nonce 与差值重建 nonce
//!    - 读取密文长度与密文，认证解密
//! 4. 若首个 Header 记录了压缩算法，对拼接后的明文流解压
//!
//! 注意：
//! - 任何解析/校验/认证失败都会终止整个解密，不做部分恢复
//! - chunk 必须按顺序处理，第 N 个 nonce 依赖第 N-1 个

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::algorithm::CryptoAlgorithm;
use crate::chunk::{self, InputChunk, Password};
use crate::compress::{self, CompressAlgorithm, Transform};
use crate::crypto::kdf::{self, Argon2Backend, RustArgon2};
use crate::crypto::nonce::NonceState;
use crate::error::{ArchiveError, Result};
use crate::format::header;
use crate::format::reader::StreamReader;

type ByteSource<'a> = Box<dyn Iterator<Item = Result<Bytes>> + 'a>;

/// 流式解密器
pub struct Decryptor {
    backend: Arc<dyn Argon2Backend>,
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decryptor {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(RustArgon2),
        }
    }

    /// 注入 Argon2 实现
    pub fn with_argon2_backend(mut self, backend: Arc<dyn Argon2Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn decrypt_iter<'a, I>(&self, source: I, password: impl Into<InputChunk>) -> Result<DecryptIter<'a>>
    where
        I: Iterator<Item = Result<InputChunk>> + 'a,
    {
        let password = Password::new(password)?;
        let source: ByteSource<'a> = Box::new(chunk::normalize(source));

        let chunks = ChunkDecrypter {
            reader: StreamReader::new(source),
            password,
            backend: Arc::clone(&self.backend),
            nonce_state: NonceState::new(),
            session: None,
            started: false,
            chunk_index: 0,
            done: false,
        };

        Ok(DecryptIter {
            stage: Stage::Pending(chunks),
        })
    }
}

/// 首个 Header 解析后在整个归档内保持不变的信息
struct Session {
    algorithm: CryptoAlgorithm,
    key: Zeroizing<Vec<u8>>,
    compress_algorithm: Option<CompressAlgorithm>,
    prev_nonce: Vec<u8>,
}

/// 逐 chunk 解密，产出各 chunk 的明文（未解压）
struct ChunkDecrypter<'a> {
    reader: StreamReader<ByteSource<'a>>,
    password: Password,
    backend: Arc<dyn Argon2Backend>,
    nonce_state: NonceState,
    session: Option<Session>,
    started: bool,
    chunk_index: u64,
    done: bool,
}

impl ChunkDecrypter<'_> {
    fn compress_algorithm(&self) -> Option<CompressAlgorithm> {
        self.session.as_ref().and_then(|s| s.compress_algorithm)
    }

    fn open_session(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header = header::parse_header_data(&mut self.reader)?;
        let algorithm = header.crypto_algorithm;

        if header.key_length as usize != algorithm.key_length() {
            return Err(ArchiveError::HeaderMismatch(format!(
                "{} requires a {}-byte key, header records {}",
                algorithm.name(),
                algorithm.key_length(),
                header.key_length
            )));
        }

        let key = kdf::derive_key(
            self.backend.as_ref(),
            self.password.as_bytes(),
            &header.key_salt,
            &header.key_derivation_options,
            header.key_length as usize,
        )?;

        debug!(
            algorithm = algorithm.name(),
            compress = header.compress_algorithm.map(CompressAlgorithm::name),
            "decryption started"
        );

        self.session = Some(Session {
            algorithm,
            key,
            compress_algorithm: header.compress_algorithm,
            prev_nonce: Vec::new(),
        });
        Ok((header.nonce, header.auth_tag))
    }

    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.started {
            self.started = true;
            // 完全为空的输入视为空明文
            if self.reader.is_end()? {
                return Ok(None);
            }
            header::validate_cid(&mut self.reader)?;
        } else if self.reader.is_end()? {
            return Ok(None);
        }

        let (nonce, auth_tag) = match self.session.as_ref() {
            None => self.open_session()?,
            Some(session) => {
                let simple = header::parse_simple_header_data(&mut self.reader)?;
                let nonce = self
                    .nonce_state
                    .apply_diff(&session.prev_nonce, &simple.nonce_diff)?;
                (nonce, simple.auth_tag)
            }
        };

        let ciphertext = self.read_ciphertext()?;
        trace!(chunk = self.chunk_index, ciphertext_len = ciphertext.len(), "chunk read");

        let Some(session) = self.session.as_mut() else {
            return Err(ArchiveError::MissingField { field: "header" });
        };
        let cleartext = session
            .algorithm
            .decrypt(&session.key, &nonce, &auth_tag, ciphertext)?;

        session.prev_nonce = nonce;
        self.chunk_index += 1;
        Ok(Some(Bytes::from(cleartext)))
    }

    fn read_ciphertext(&mut self) -> Result<Vec<u8>> {
        let length = header::read_ciphertext_length(&mut self.reader)?;

        // 长度来自线上数据，预分配不超过已缓冲的字节数
        let mut ciphertext = Vec::with_capacity(length.min(self.reader.buffered_len()));
        let mut read_size = 0;
        for entry in self.reader.read_iter(length, 0) {
            let entry = entry?;
            match entry.data {
                Some(data) => ciphertext.extend_from_slice(&data),
                None => read_size = entry.read_size,
            }
        }

        if read_size < length {
            return Err(ArchiveError::Truncated {
                what: "ciphertext",
                required: length as u64,
                got: read_size as u64,
            });
        }
        Ok(ciphertext)
    }
}

impl Iterator for ChunkDecrypter<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                debug!(chunks = self.chunk_index, "decryption finished");
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

enum Stage<'a> {
    /// 首个 Header 尚未解析，不知道是否需要解压
    Pending(ChunkDecrypter<'a>),
    Plain(ChunkDecrypter<'a>),
    Decompressing(Transform<'a>),
    Done,
}

/// 惰性产出明文的迭代器
pub struct DecryptIter<'a> {
    stage: Stage<'a>,
}

impl<'a> Iterator for DecryptIter<'a> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Done => return None,
            Stage::Plain(mut chunks) => {
                let item = chunks.next();
                self.stage = Stage::Plain(chunks);
                item
            }
            Stage::Decompressing(mut stream) => {
                let item = stream.next();
                self.stage = Stage::Decompressing(stream);
                item
            }
            Stage::Pending(mut chunks) => {
                let first = match chunks.next() {
                    Some(Ok(first)) => first,
                    other => return other,
                };
                match chunks.compress_algorithm() {
                    None => {
                        self.stage = Stage::Plain(chunks);
                        Some(Ok(first))
                    }
                    Some(algorithm) => {
                        let plain = std::iter::once(Ok(first)).chain(chunks);
                        let mut stream: Transform<'a> = compress::decompress(plain, algorithm);
                        let item = stream.next();
                        self.stage = Stage::Decompressing(stream);
                        item
                    }
                }
            }
        };

        if matches!(item, Some(Err(_))) {
            self.stage = Stage::Done;
        }
        item
    }
}

/// 一次性解密，返回完整明文
pub fn decrypt(archive: impl Into<InputChunk>, password: impl Into<InputChunk>) -> Result<Vec<u8>> {
    let source = std::iter::once(Ok::<_, ArchiveError>(archive.into()));
    let mut out = Vec::new();
    for chunk in Decryptor::new().decrypt_iter(source, password)? {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
