//! 密钥派生函数（KDF）模块
//!
//! 本模块负责将用户密码通过 Argon2 派生为对称加密密钥。
//!
//! 设计目标：
//! - 每个归档使用独立的随机 salt
//! - KDF 参数写入首个 header，解密时按 header 还原
//! - 敏感密钥材料在离开作用域后自动清零
//! - Argon2 的具体实现通过 [`Argon2Backend`] 注入，核心流程不关心由谁计算
//!
//! 参数范围：
//! - iterations ∈ [1, 2^32-1]
//! - parallelism ∈ [1, 2^24-1]
//! - memory (KiB) ∈ [8 × parallelism, 2^32-1]

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{RngCore, rngs::OsRng};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{ArchiveError, Result};
use crate::format::proto;

/// KDF salt 长度（字节）
pub const SALT_LENGTH: usize = 16;

const MAX_PARALLELISM: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Algorithm {
    Argon2d,
    Argon2id,
}

impl Argon2Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Argon2d => "argon2d",
            Self::Argon2id => "argon2id",
        }
    }
}

impl FromStr for Argon2Algorithm {
    type Err = ArchiveError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "argon2d" => Ok(Self::Argon2d),
            "argon2id" => Ok(Self::Argon2id),
            _ => Err(ArchiveError::UnknownAlgorithm {
                kind: "argon2 algorithm",
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Argon2Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 规范化后的 Argon2 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Options {
    pub algorithm: Argon2Algorithm,
    pub iterations: u32,
    /// 内存成本（KiB）
    pub memory: u32,
    pub parallelism: u32,
}

impl Default for Argon2Options {
    fn default() -> Self {
        Self {
            algorithm: Argon2Algorithm::Argon2d,
            iterations: 3,
            memory: 12,
            parallelism: 1,
        }
    }
}

impl Argon2Options {
    pub fn new(
        algorithm: Argon2Algorithm,
        iterations: u32,
        memory: u32,
        parallelism: u32,
    ) -> Result<Self> {
        let options = Self {
            algorithm,
            iterations,
            memory,
            parallelism,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < 1 {
            return Err(ArchiveError::out_of_range(
                "argon2.iterations",
                ">= 1",
                self.iterations,
            ));
        }
        if !(1..=MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(ArchiveError::out_of_range(
                "argon2.parallelism",
                format!("between 1 and {MAX_PARALLELISM}"),
                self.parallelism,
            ));
        }
        let min_memory = 8 * u64::from(self.parallelism);
        if u64::from(self.memory) < min_memory {
            return Err(ArchiveError::out_of_range(
                "argon2.memory",
                format!(">= {min_memory} (8 * parallelism)"),
                self.memory,
            ));
        }
        Ok(())
    }
}

/// KDF 选项（带标签的和类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivationOptions {
    Argon2(Argon2Options),
}

impl Default for KeyDerivationOptions {
    fn default() -> Self {
        Self::Argon2(Argon2Options::default())
    }
}

impl KeyDerivationOptions {
    pub fn salt_length(&self) -> usize {
        match self {
            Self::Argon2(_) => SALT_LENGTH,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Argon2(options) => options.validate(),
        }
    }

    pub(crate) fn to_proto(self) -> proto::header::KeyDerivationOptions {
        match self {
            Self::Argon2(options) => {
                let algorithm = match options.algorithm {
                    Argon2Algorithm::Argon2d => proto::Argon2Algorithm::Argon2d,
                    Argon2Algorithm::Argon2id => proto::Argon2Algorithm::Argon2id,
                };
                proto::header::KeyDerivationOptions::Argon2KeyDerivationOptions(
                    proto::Argon2Options {
                        algorithm: algorithm as i32,
                        iterations: options.iterations,
                        memory: options.memory,
                        parallelism: options.parallelism,
                    },
                )
            }
        }
    }

    pub(crate) fn from_proto(value: Option<proto::header::KeyDerivationOptions>) -> Result<Self> {
        let Some(value) = value else {
            return Err(ArchiveError::MissingField {
                field: "key_derivation_options",
            });
        };

        match value {
            proto::header::KeyDerivationOptions::Argon2KeyDerivationOptions(options) => {
                let algorithm = match proto::Argon2Algorithm::try_from(options.algorithm) {
                    Ok(proto::Argon2Algorithm::Argon2d) => Argon2Algorithm::Argon2d,
                    Ok(proto::Argon2Algorithm::Argon2id) => Argon2Algorithm::Argon2id,
                    Err(_) => {
                        return Err(ArchiveError::UnknownEnumValue {
                            field: "argon2_key_derivation_options.algorithm",
                            value: options.algorithm,
                        });
                    }
                };
                let options = Argon2Options::new(
                    algorithm,
                    options.iterations,
                    options.memory,
                    options.parallelism,
                )?;
                Ok(Self::Argon2(options))
            }
        }
    }
}

/// Argon2 计算后端
///
/// 默认使用 [`RustArgon2`]，也可注入其他实现（如硬件加速或测试替身）。
pub trait Argon2Backend: Send + Sync {
    fn hash_into(
        &self,
        password: &[u8],
        salt: &[u8],
        options: &Argon2Options,
        output: &mut [u8],
    ) -> Result<()>;
}

/// 基于 `argon2` crate 的纯 Rust 实现
#[derive(Debug, Clone, Copy, Default)]
pub struct RustArgon2;

impl Argon2Backend for RustArgon2 {
    fn hash_into(
        &self,
        password: &[u8],
        salt: &[u8],
        options: &Argon2Options,
        output: &mut [u8],
    ) -> Result<()> {
        let params = Params::new(
            options.memory,
            options.iterations,
            options.parallelism,
            Some(output.len()),
        )
        .map_err(|e| ArchiveError::Kdf(format!("argon2: {e}")))?;

        let algorithm = match options.algorithm {
            Argon2Algorithm::Argon2d => Algorithm::Argon2d,
            Argon2Algorithm::Argon2id => Algorithm::Argon2id,
        };

        Argon2::new(algorithm, Version::V0x13, params)
            .hash_password_into(password, salt, output)
            .map_err(|e| ArchiveError::Kdf(format!("argon2: {e}")))
    }
}

/// 生成用于 KDF 的随机 salt
///
/// 每个归档都必须使用独立的 salt，严禁复用。
pub fn generate_salt(length: usize) -> Vec<u8> {
    let mut salt = vec![0u8; length];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// 根据密码、salt 与 KDF 选项派生 `key_length` 字节的密钥
///
/// 返回值使用 `Zeroizing` 包装，离开作用域后清零。
pub fn derive_key(
    backend: &dyn Argon2Backend,
    password: &[u8],
    salt: &[u8],
    options: &KeyDerivationOptions,
    key_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    options.validate()?;

    let mut key = Zeroizing::new(vec![0u8; key_length]);
    match options {
        KeyDerivationOptions::Argon2(argon2) => {
            debug!(
                algorithm = argon2.algorithm.name(),
                iterations = argon2.iterations,
                memory = argon2.memory,
                parallelism = argon2.parallelism,
                "deriving key"
            );
            backend.hash_into(password, salt, argon2, &mut key[..])?;
        }
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let options = KeyDerivationOptions::default();
        let salt = [3u8; SALT_LENGTH];

        let a = derive_key(&RustArgon2, b"dragon", &salt, &options, 32).unwrap();
        let b = derive_key(&RustArgon2, b"dragon", &salt, &options, 32).unwrap();
        let c = derive_key(&RustArgon2, b"dragon ", &salt, &options, 32).unwrap();

        assert_eq!(a.len(), 32);
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn validates_parameter_ranges() {
        use Argon2Algorithm::Argon2id;

        assert!(Argon2Options::new(Argon2id, 0, 64, 1).is_err());
        assert!(Argon2Options::new(Argon2id, 1, 64, 0).is_err());
        assert!(Argon2Options::new(Argon2id, 1, 64, 1 << 24).is_err());
        assert!(Argon2Options::new(Argon2id, 1, 15, 2).is_err());
        assert!(Argon2Options::new(Argon2id, 1, 16, 2).is_ok());
        assert!(Argon2Options::new(Argon2id, u32::MAX, 8, 1).is_ok());
    }

    #[test]
    fn proto_without_oneof_is_rejected() {
        let err = KeyDerivationOptions::from_proto(None).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingField { .. }));
    }

    #[test]
    fn proto_with_unknown_algorithm_is_rejected() {
        let value = proto::header::KeyDerivationOptions::Argon2KeyDerivationOptions(
            proto::Argon2Options {
                algorithm: 9,
                iterations: 1,
                memory: 8,
                parallelism: 1,
            },
        );
        let err = KeyDerivationOptions::from_proto(Some(value)).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownEnumValue { value: 9, .. }));
    }

    #[test]
    fn proto_round_trip() {
        let options = KeyDerivationOptions::Argon2(
            Argon2Options::new(Argon2Algorithm::Argon2id, 2, 32, 2).unwrap(),
        );
        let decoded = KeyDerivationOptions::from_proto(Some(options.to_proto())).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn unknown_algorithm_name_is_a_type_error() {
        let err = "scrypt".parse::<Argon2Algorithm>().unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Type);
    }
}
