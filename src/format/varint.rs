//! 无符号 LEB128 varint 编解码
//!
//! 每字节低 7 位为数据位，最高位为续位标志。
//! 归档中的所有长度前缀与 CID 都使用该编码。

use crate::error::{ArchiveError, Result};

/// 解码时允许的最大字节数
pub const MAX_BYTES: usize = 9;

/// 解码结果：数值与其占用的字节数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub value: u64,
    pub byte_length: usize,
}

pub fn encode(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    while value >= 0x80 {
        out.push(((value as u8) & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out
}

pub fn encoded_len(mut value: u64) -> usize {
    let mut n = 1usize;
    while value >= 0x80 {
        n += 1;
        value >>= 7;
    }
    n
}

/// 从 `bytes[offset..]` 解码一个 varint
///
/// 续位在 `MAX_BYTES` 字节内未终止，或输入提前耗尽，均返回 `InvalidVarint`。
pub fn decode(bytes: &[u8], offset: usize) -> Result<Decoded> {
    let input = bytes.get(offset..).unwrap_or_default();
    let mut value = 0u64;

    for (i, byte) in input.iter().take(MAX_BYTES).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Decoded {
                value,
                byte_length: i + 1,
            });
        }
    }

    Err(ArchiveError::InvalidVarint)
}
