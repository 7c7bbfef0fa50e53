//! Header 的 protobuf 消息定义
//!
//! 字段编号与线格式固定，修改会破坏与已有归档的兼容性：
//!
//! ```text
//! message Header {
//!   bytes             crypto_nonce       = 1;
//!   bytes             crypto_auth_tag    = 2;
//!   CryptoAlgorithm   crypto_algorithm   = 3;
//!   bytes             key_salt           = 4;
//!   uint32            key_length         = 5;
//!   CompressAlgorithm compress_algorithm = 6;
//!   oneof key_derivation_options {
//!     Argon2Options   argon2_key_derivation_options = 15;
//!   }
//! }
//!
//! message Argon2Options {
//!   Argon2Algorithm algorithm   = 1;
//!   uint32          iterations  = 2;
//!   uint32          memory      = 3;
//!   uint32          parallelism = 4;
//! }
//!
//! message SimpleHeader {
//!   bytes  crypto_auth_tag                            = 1;
//!   uint64 crypto_nonce_fixed_add                     = 2;
//!   uint64 crypto_nonce_invocation_count_add_or_reset = 3;
//! }
//! ```

#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(bytes = "vec", tag = "1")]
    pub crypto_nonce: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub crypto_auth_tag: Vec<u8>,
    #[prost(enumeration = "CryptoAlgorithm", tag = "3")]
    pub crypto_algorithm: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub key_salt: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub key_length: u32,
    #[prost(enumeration = "CompressAlgorithm", tag = "6")]
    pub compress_algorithm: i32,
    #[prost(oneof = "header::KeyDerivationOptions", tags = "15")]
    pub key_derivation_options: Option<header::KeyDerivationOptions>,
}

pub mod header {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum KeyDerivationOptions {
        #[prost(message, tag = "15")]
        Argon2KeyDerivationOptions(super::Argon2Options),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Argon2Options {
    #[prost(enumeration = "Argon2Algorithm", tag = "1")]
    pub algorithm: i32,
    #[prost(uint32, tag = "2")]
    pub iterations: u32,
    #[prost(uint32, tag = "3")]
    pub memory: u32,
    #[prost(uint32, tag = "4")]
    pub parallelism: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SimpleHeader {
    #[prost(bytes = "vec", tag = "1")]
    pub crypto_auth_tag: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub crypto_nonce_fixed_add: u64,
    #[prost(uint64, tag = "3")]
    pub crypto_nonce_invocation_count_add_or_reset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CryptoAlgorithm {
    Aes256Gcm = 0,
    Chacha20Poly1305 = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CompressAlgorithm {
    None = 0,
    Gzip = 1,
    Brotli = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Argon2Algorithm {
    Argon2d = 0,
    Argon2id = 1,
}
