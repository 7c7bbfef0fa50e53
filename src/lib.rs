//! 基于密码的流式加密归档
//!
//! 明文以 chunk 序列输入，逐 chunk 认证加密后输出自描述的归档字节流；
//! 解密时同样按 chunk 惰性处理，任何篡改都会导致认证失败。
//!
//! ```no_run
//! use archive_engine::{EncryptOptions, decrypt, encrypt};
//!
//! let archive = encrypt("attack at dawn", "dragon", &EncryptOptions::default())?;
//! assert_eq!(decrypt(archive, "dragon")?, b"attack at dawn");
//! # Ok::<(), archive_engine::ArchiveError>(())
//! ```

mod decrypt;
mod encrypt;

pub mod algorithm;
pub mod chunk;
pub mod compress;
pub mod crypto;
pub mod error;
pub mod format;
pub mod fs;

pub use algorithm::CryptoAlgorithm;
pub use chunk::{InputChunk, chunks_of, read_chunks};
pub use compress::{CompressAlgorithm, CompressOptions};
pub use crypto::kdf::{Argon2Algorithm, Argon2Backend, Argon2Options, KeyDerivationOptions};
pub use decrypt::{DecryptIter, Decryptor, decrypt};
pub use encrypt::{EncryptIter, EncryptOptions, Encryptor, encrypt};
pub use error::{ArchiveError, ErrorClass, Result};

use std::fs::File;
use std::path::Path;

/// 文件加解密时每次读取的明文/归档块大小
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 加密文件，输出以原子方式写入
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    password: impl Into<InputChunk>,
    options: &EncryptOptions,
) -> Result<()> {
    encrypt_file_with(&Encryptor::new(*options), input, output, password, DEFAULT_CHUNK_SIZE)
}

/// 解密文件，输出以原子方式写入；认证失败时不会产生输出文件
pub fn decrypt_file(input: &Path, output: &Path, password: impl Into<InputChunk>) -> Result<()> {
    decrypt_file_with(&Decryptor::new(), input, output, password, DEFAULT_CHUNK_SIZE)
}

pub fn encrypt_file_with(
    encryptor: &Encryptor,
    input: &Path,
    output: &Path,
    password: impl Into<InputChunk>,
    chunk_size: usize,
) -> Result<()> {
    let source = read_chunks(File::open(input)?, chunk_size);
    let archive = encryptor.encrypt_iter(source, password)?;

    fs::atomic::write_atomic(output, |writer| {
        for chunk in archive {
            writer.write_all(&chunk?)?;
        }
        Ok(())
    })
}

pub fn decrypt_file_with(
    decryptor: &Decryptor,
    input: &Path,
    output: &Path,
    password: impl Into<InputChunk>,
    chunk_size: usize,
) -> Result<()> {
    let source = read_chunks(File::open(input)?, chunk_size);
    let cleartext = decryptor.decrypt_iter(source, password)?;

    fs::atomic::write_atomic(output, |writer| {
        for chunk in cleartext {
            writer.write_all(&chunk?)?;
        }
        Ok(())
    })
}
