//! 输入 chunk 与密码的规范化
//!
//! 源中的每个 chunk 在进入缓冲前都会被校验并转为原始字节：
//! - 原始字节直接使用
//! - 字符串按 UTF-8 编码，或按指定的编码名解码
//! - 未知编码名或内容与编码不符时返回类型错误

use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use zeroize::Zeroizing;

use crate::error::{ArchiveError, Result};

/// 源中的单个 chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputChunk {
    Bytes(Bytes),
    Text(String),
    Encoded { text: String, encoding: String },
}

impl InputChunk {
    /// 带编码名的字符串 chunk（`utf8`、`hex`、`base64`、`latin1`、`ascii` 等）
    pub fn encoded(text: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self::Encoded {
            text: text.into(),
            encoding: encoding.into(),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Text(text) => Ok(Bytes::from(text.into_bytes())),
            Self::Encoded { text, encoding } => decode_text(text, &encoding).map(Bytes::from),
        }
    }
}

fn decode_text(text: String, encoding: &str) -> Result<Vec<u8>> {
    let invalid = |reason: String| {
        ArchiveError::InvalidType(format!("chunk is not valid {encoding}: {reason}"))
    };

    match encoding.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Ok(text.into_bytes()),
        "hex" => hex::decode(&text).map_err(|e| invalid(e.to_string())),
        "base64" => STANDARD.decode(&text).map_err(|e| invalid(e.to_string())),
        "latin1" | "binary" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| invalid(format!("{c:?} out of range"))))
            .collect(),
        "ascii" => {
            if text.is_ascii() {
                Ok(text.into_bytes())
            } else {
                Err(invalid("non-ascii character".to_string()))
            }
        }
        _ => Err(ArchiveError::InvalidType(format!(
            "unknown encoding {encoding:?}"
        ))),
    }
}

impl From<Bytes> for InputChunk {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for InputChunk {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for InputChunk {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for InputChunk {
    fn from(value: &[u8; N]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<String> for InputChunk {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for InputChunk {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// 规范化后的密码，离开作用域后清零
pub struct Password(Zeroizing<Vec<u8>>);

impl Password {
    pub fn new(value: impl Into<InputChunk>) -> Result<Self> {
        let bytes = value.into().into_bytes()?;
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(..)")
    }
}

/// 将任意 chunk 序列包装为可失败的源
pub fn chunks_of<I>(chunks: I) -> impl Iterator<Item = Result<InputChunk>>
where
    I: IntoIterator,
    I::Item: Into<InputChunk>,
{
    chunks.into_iter().map(|chunk| Ok(chunk.into()))
}

/// 以 `chunk_size` 为单位从 reader 惰性读取
pub fn read_chunks<R: Read>(
    mut reader: R,
    chunk_size: usize,
) -> impl Iterator<Item = Result<InputChunk>> {
    let mut finished = false;
    std::iter::from_fn(move || {
        if finished {
            return None;
        }
        let mut buffer = vec![0u8; chunk_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    finished = true;
                    return Some(Err(ArchiveError::Io(e)));
                }
            }
        }
        if filled < buffer.len() {
            finished = true;
        }
        if filled == 0 {
            return None;
        }
        buffer.truncate(filled);
        Some(Ok(InputChunk::from(buffer)))
    })
}

pub(crate) fn normalize<I>(source: I) -> impl Iterator<Item = Result<Bytes>>
where
    I: Iterator<Item = Result<InputChunk>>,
{
    source.map(|chunk| chunk.and_then(InputChunk::into_bytes))
}
