use thiserror::Error;

/// 错误类别
///
/// 所有失败都是输入字节/参数的确定性结果，任何类别都不应重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 输入类型不受支持（密码/chunk 类型、未知算法名等），调用方可修正
    Type,
    /// 数值或字节长度超出协议允许范围
    Range,
    /// 格式错误：varint、CID、截断、oneof 未设置、未知枚举值
    Format,
    /// 认证失败：密码错误或数据被篡改
    Integrity,
    /// 底层 I/O
    Io,
    /// KDF / AEAD / 压缩实现内部错误（已加来源前缀）
    Internal,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("unknown {kind} name: {name:?}")]
    UnknownAlgorithm { kind: &'static str, name: String },

    #[error("{field} must be {expected}, but received {actual}")]
    OutOfRange {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("nonce overflow: all bits overflowing (fixed field exceeds {bits} bits)")]
    NonceOverflow { bits: u32 },

    #[error("could not decode varint")]
    InvalidVarint,

    #[error("could not decode content identifier")]
    CidDecode,

    #[error("invalid content identifier: expected 0x{expected:06x}, received 0x{actual:x}")]
    CidMismatch { expected: u64, actual: u64 },

    #[error("could not read {what}: required {required} bytes, got {got} bytes")]
    Truncated {
        what: &'static str,
        required: u64,
        got: u64,
    },

    #[error("could not decode {what}: {source}")]
    Protobuf {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("{field} is not set")]
    MissingField { field: &'static str },

    #[error("unknown {field} value: {value}")]
    UnknownEnumValue { field: &'static str, value: i32 },

    #[error("header mismatch: {0}")]
    HeaderMismatch(String),

    #[error("authentication failed: invalid password or corrupted data")]
    Authentication,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("{algorithm} encryption failed")]
    Cipher { algorithm: &'static str },

    #[error("{algorithm} stream failed: {source}")]
    Compression {
        algorithm: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidType(_) | Self::UnknownAlgorithm { .. } => ErrorClass::Type,
            Self::OutOfRange { .. } | Self::NonceOverflow { .. } => ErrorClass::Range,
            Self::InvalidVarint
            | Self::CidDecode
            | Self::CidMismatch { .. }
            | Self::Truncated { .. }
            | Self::Protobuf { .. }
            | Self::MissingField { .. }
            | Self::UnknownEnumValue { .. }
            | Self::HeaderMismatch(_) => ErrorClass::Format,
            Self::Authentication => ErrorClass::Integrity,
            Self::Io(_) => ErrorClass::Io,
            Self::Kdf(_) | Self::Cipher { .. } | Self::Compression { .. } => ErrorClass::Internal,
        }
    }

    pub(crate) fn out_of_range(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}
