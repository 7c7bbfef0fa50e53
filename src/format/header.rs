//! 归档 Header 编解码
//!
//! 归档布局（无外层封装）：
//!
//! ```text
//! [CID varint][header 长度 varint][Header][密文长度 varint][密文]
//! [simple header 长度 varint][SimpleHeader][密文长度 varint][密文]
//! ...
//! ```
//!
//! - 首个 chunk 使用完整 Header：算法、nonce、认证标签、salt、KDF 参数、压缩算法
//! - 后续 chunk 使用 SimpleHeader：仅包含认证标签与相对上一个 nonce 的差值
//! - 任意字段解析失败都必须拒绝继续处理
//!
//! SimpleHeader 中 nonce 差值的两种形态共用一组字段：
//! `crypto_nonce_fixed_add > 0` 表示 fixed field 差值，
//! 否则表示 invocation count 差值，且线上存储的是 `add - 1`。

use bytes::Bytes;
use prost::Message;
use tracing::trace;

use crate::algorithm::CryptoAlgorithm;
use crate::compress::CompressAlgorithm;
use crate::crypto::kdf::KeyDerivationOptions;
use crate::crypto::nonce::NonceDiff;
use crate::error::{ArchiveError, Result};
use crate::format::proto;
use crate::format::reader::StreamReader;
use crate::format::varint;

/// 内容标识（私有使用区 0x300000–0x3FFFFF 内的固定值），标识格式与版本
pub const CID: u64 = 0x30_5C_2B;

const U64_MAX: i128 = u64::MAX as i128;

/// header / simple header 消息体的长度上限，超出即视为损坏的归档
pub const MAX_HEADER_LENGTH: usize = 64 * 1024;

/// 首个 chunk 的完整 header 数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderData {
    pub crypto_algorithm: CryptoAlgorithm,
    pub nonce: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub key_length: u32,
    pub key_salt: Vec<u8>,
    pub key_derivation_options: KeyDerivationOptions,
    pub compress_algorithm: Option<CompressAlgorithm>,
}

/// 后续 chunk 的简化 header 数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleHeaderData {
    pub nonce_diff: NonceDiff,
    pub auth_tag: Vec<u8>,
}

/// 生成 `CID || varint(len) || Header || varint(ciphertext_len)`
pub fn create_header(data: &HeaderData, ciphertext_len: usize) -> Result<Vec<u8>> {
    require_non_empty("crypto_nonce", &data.nonce)?;
    require_non_empty("crypto_auth_tag", &data.auth_tag)?;
    require_non_empty("key_salt", &data.key_salt)?;
    if data.key_length < 1 {
        return Err(ArchiveError::out_of_range("key_length", ">= 1", data.key_length));
    }

    let message = proto::Header {
        crypto_nonce: data.nonce.clone(),
        crypto_auth_tag: data.auth_tag.clone(),
        crypto_algorithm: data.crypto_algorithm.to_proto() as i32,
        key_salt: data.key_salt.clone(),
        key_length: data.key_length,
        compress_algorithm: CompressAlgorithm::to_proto(data.compress_algorithm) as i32,
        key_derivation_options: Some(data.key_derivation_options.to_proto()),
    };

    let mut out = varint::encode(CID);
    append_record(&mut out, &message.encode_to_vec(), ciphertext_len);
    Ok(out)
}

/// 生成 `varint(len) || SimpleHeader || varint(ciphertext_len)`
pub fn create_simple_header(data: &SimpleHeaderData, ciphertext_len: usize) -> Result<Vec<u8>> {
    require_non_empty("crypto_auth_tag", &data.auth_tag)?;

    let (fixed_add, add_or_reset) = match data.nonce_diff {
        NonceDiff::InvocationCount { add } => {
            let add = wire_u64("nonce_diff.add_counter", add, 1)?;
            (0, add - 1)
        }
        NonceDiff::FixedField {
            add,
            reset_invocation_count,
        } => {
            let add = wire_u64("nonce_diff.fixed_add", add, 1)?;
            let reset = i128::try_from(reset_invocation_count).unwrap_or(i128::MAX);
            let reset = wire_u64("nonce_diff.reset_counter", reset, 0)?;
            (add, reset)
        }
    };

    let message = proto::SimpleHeader {
        crypto_auth_tag: data.auth_tag.clone(),
        crypto_nonce_fixed_add: fixed_add,
        crypto_nonce_invocation_count_add_or_reset: add_or_reset,
    };

    let mut out = Vec::new();
    append_record(&mut out, &message.encode_to_vec(), ciphertext_len);
    Ok(out)
}

/// 读取并校验 CID
pub fn validate_cid<S>(reader: &mut StreamReader<S>) -> Result<()>
where
    S: Iterator<Item = Result<Bytes>>,
{
    let decoded = reader.peek_varint().map_err(|e| match e {
        ArchiveError::InvalidVarint => ArchiveError::CidDecode,
        other => other,
    })?;

    if decoded.value != CID {
        return Err(ArchiveError::CidMismatch {
            expected: CID,
            actual: decoded.value,
        });
    }

    reader.seek(decoded.byte_length)
}

pub fn parse_header_data<S>(reader: &mut StreamReader<S>) -> Result<HeaderData>
where
    S: Iterator<Item = Result<Bytes>>,
{
    let record = read_length_prefixed(reader, "header")?;
    let message = proto::Header::decode(record).map_err(|source| ArchiveError::Protobuf {
        what: "header",
        source,
    })?;

    let crypto_algorithm = proto::CryptoAlgorithm::try_from(message.crypto_algorithm)
        .map(CryptoAlgorithm::from_proto)
        .map_err(|_| ArchiveError::UnknownEnumValue {
            field: "crypto_algorithm",
            value: message.crypto_algorithm,
        })?;

    let compress_algorithm = proto::CompressAlgorithm::try_from(message.compress_algorithm)
        .map(CompressAlgorithm::from_proto)
        .map_err(|_| ArchiveError::UnknownEnumValue {
            field: "compress_algorithm",
            value: message.compress_algorithm,
        })?;

    let key_derivation_options = KeyDerivationOptions::from_proto(message.key_derivation_options)?;

    require_present("crypto_nonce", &message.crypto_nonce)?;
    require_present("crypto_auth_tag", &message.crypto_auth_tag)?;
    require_present("key_salt", &message.key_salt)?;
    if message.key_length < 1 {
        return Err(ArchiveError::MissingField {
            field: "key_length",
        });
    }

    trace!(
        algorithm = crypto_algorithm.name(),
        nonce_len = message.crypto_nonce.len(),
        "parsed header"
    );

    Ok(HeaderData {
        crypto_algorithm,
        nonce: message.crypto_nonce,
        auth_tag: message.crypto_auth_tag,
        key_length: message.key_length,
        key_salt: message.key_salt,
        key_derivation_options,
        compress_algorithm,
    })
}

pub fn parse_simple_header_data<S>(reader: &mut StreamReader<S>) -> Result<SimpleHeaderData>
where
    S: Iterator<Item = Result<Bytes>>,
{
    let record = read_length_prefixed(reader, "simple header")?;
    let message = proto::SimpleHeader::decode(record).map_err(|source| ArchiveError::Protobuf {
        what: "simple header",
        source,
    })?;

    require_present("crypto_auth_tag", &message.crypto_auth_tag)?;

    let fixed_add = message.crypto_nonce_fixed_add;
    let add_or_reset = message.crypto_nonce_invocation_count_add_or_reset;
    let nonce_diff = if fixed_add > 0 {
        NonceDiff::FixedField {
            add: i128::from(fixed_add),
            reset_invocation_count: u128::from(add_or_reset),
        }
    } else {
        NonceDiff::InvocationCount {
            add: i128::from(add_or_reset) + 1,
        }
    };

    Ok(SimpleHeaderData {
        nonce_diff,
        auth_tag: message.crypto_auth_tag,
    })
}

/// 读取密文长度前缀（必须 >= 1）
pub fn read_ciphertext_length<S>(reader: &mut StreamReader<S>) -> Result<usize>
where
    S: Iterator<Item = Result<Bytes>>,
{
    read_length(reader, "ciphertext")
}

/// 读取 `varint(len) || bytes`，长度不足时报错
pub fn read_length_prefixed<S>(reader: &mut StreamReader<S>, what: &'static str) -> Result<Bytes>
where
    S: Iterator<Item = Result<Bytes>>,
{
    let length = read_length(reader, what)?;
    if length > MAX_HEADER_LENGTH {
        return Err(ArchiveError::out_of_range(
            format!("{what} byte length"),
            format!("<= {MAX_HEADER_LENGTH}"),
            length,
        ));
    }

    let data = reader.read(length, 0)?;
    if data.len() < length {
        return Err(ArchiveError::Truncated {
            what,
            required: length as u64,
            got: data.len() as u64,
        });
    }

    reader.seek(length)?;
    Ok(data)
}

fn read_length<S>(reader: &mut StreamReader<S>, what: &'static str) -> Result<usize>
where
    S: Iterator<Item = Result<Bytes>>,
{
    let decoded = reader.peek_varint()?;
    if decoded.value < 1 {
        return Err(ArchiveError::out_of_range(
            format!("{what} byte length"),
            ">= 1",
            decoded.value,
        ));
    }
    let length = usize::try_from(decoded.value).map_err(|_| {
        ArchiveError::out_of_range(
            format!("{what} byte length"),
            format!("<= {}", usize::MAX),
            decoded.value,
        )
    })?;

    reader.seek(decoded.byte_length)?;
    Ok(length)
}

fn append_record(out: &mut Vec<u8>, record: &[u8], ciphertext_len: usize) {
    out.extend_from_slice(&varint::encode(record.len() as u64));
    out.extend_from_slice(record);
    out.extend_from_slice(&varint::encode(ciphertext_len as u64));
}

fn wire_u64(field: &str, value: i128, min: i128) -> Result<u64> {
    if value < min {
        return Err(ArchiveError::out_of_range(field, format!(">= {min}"), value));
    }
    if value > U64_MAX {
        return Err(ArchiveError::out_of_range(field, format!("<= {U64_MAX}"), value));
    }
    Ok(value as u64)
}

fn require_non_empty(field: &str, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(ArchiveError::out_of_range(field, "non-empty", "0 bytes"));
    }
    Ok(())
}

fn require_present(field: &'static str, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(ArchiveError::MissingField { field });
    }
    Ok(())
}
