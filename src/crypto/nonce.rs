//! Nonce 状态机
//!
//! Nonce 布局（均为小端无符号整数）：
//!
//! ```text
//! [ fixed field: 7 bytes ][ invocation count: 1..=8 bytes ]
//! ```
//!
//! - fixed field 在进程启动时以墙钟毫秒数作为种子
//! - invocation count 每生成一个 nonce 递增一次
//! - invocation count 超出字段宽度时，溢出部分进位到 fixed field
//! - fixed field 超出 7 字节即视为耗尽，拒绝继续生成
//!
//! 状态 `(fixed_field, invocation_count)` 只增不减：
//! 使用过期的「上一个 nonce」重建时不会让状态回退，
//! 因此同一个 `NonceState` 产生的 nonce 两两不同。
//!
//! 归档中不保存 nonce 本身（首个 chunk 除外），
//! 只保存与上一个 chunk nonce 的差值，见 [`NonceDiff`]。

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::error::{ArchiveError, Result};

/// fixed field 字节数
pub const FIXED_FIELD_BYTES: usize = 7;

/// `create` 允许的 nonce 长度范围（invocation 字段至少 2 字节）
pub const MIN_NONCE_BYTES: usize = 9;
pub const MAX_NONCE_BYTES: usize = 15;

/// 由差值重建时，上一个 nonce 允许的最小长度
pub const MIN_DIFF_NONCE_BYTES: usize = 8;

const FIXED_FIELD_BITS: u32 = (FIXED_FIELD_BYTES * 8) as u32;
const FIXED_FIELD_MAX: u128 = (1 << FIXED_FIELD_BITS) - 1;

/// 两个 nonce 之间的差值
///
/// fixed field 未变化时只记录 invocation count 的增量，
/// 否则记录 fixed field 增量以及新的 invocation count。
/// 增量理论上可为负，写入 header 时再做范围检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceDiff {
    InvocationCount {
        add: i128,
    },
    FixedField {
        add: i128,
        reset_invocation_count: u128,
    },
}

/// 解析后的 nonce 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NonceFields {
    fixed_field: u128,
    invocation_count: u128,
    invocation_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct NonceState {
    fixed_field: u128,
    invocation_count: u128,
}

impl Default for NonceState {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceState {
    /// 以当前墙钟毫秒数为 fixed field 种子
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Self::with_seed(millis & FIXED_FIELD_MAX, 0)
    }

    pub fn with_seed(fixed_field: u128, invocation_count: u128) -> Self {
        Self {
            fixed_field,
            invocation_count,
        }
    }

    /// 当前内部状态 `(fixed_field, invocation_count)`
    pub fn state(&self) -> (u128, u128) {
        (self.fixed_field, self.invocation_count)
    }

    /// 生成一个新的 nonce
    ///
    /// `byte_length` 必须在 `[9, 15]` 内。
    pub fn create(&mut self, byte_length: usize) -> Result<Vec<u8>> {
        validate_length("nonce byte length", byte_length, MIN_NONCE_BYTES)?;

        let invocation_bytes = byte_length - FIXED_FIELD_BYTES;
        self.build(self.fixed_field, self.invocation_count, invocation_bytes)
    }

    /// 在上一个 nonce 的 invocation count 上加 `add`，生成同长度的 nonce
    pub fn create_from_invocation_count_diff(&mut self, prev: &[u8], add: u128) -> Result<Vec<u8>> {
        if add < 1 {
            return Err(ArchiveError::out_of_range("add_invocation_count", ">= 1", add));
        }

        let fields = parse(prev)?;
        let invocation_count = fields
            .invocation_count
            .checked_add(add)
            .ok_or(ArchiveError::NonceOverflow { bits: FIXED_FIELD_BITS })?;

        self.build(fields.fixed_field, invocation_count, fields.invocation_bytes)
    }

    /// 在上一个 nonce 的 fixed field 上加 `add`，并把 invocation count 重置为 `reset`
    pub fn create_from_fixed_field_diff(
        &mut self,
        prev: &[u8],
        add: u128,
        reset_invocation_count: u128,
    ) -> Result<Vec<u8>> {
        if add < 1 {
            return Err(ArchiveError::out_of_range("add_fixed_field", ">= 1", add));
        }

        let fields = parse(prev)?;
        let fixed_field = fields
            .fixed_field
            .checked_add(add)
            .ok_or(ArchiveError::NonceOverflow { bits: FIXED_FIELD_BITS })?;

        self.build(fixed_field, reset_invocation_count, fields.invocation_bytes)
    }

    /// 按差值类型分派到对应的重建函数
    pub fn apply_diff(&mut self, prev: &[u8], diff: &NonceDiff) -> Result<Vec<u8>> {
        match *diff {
            NonceDiff::InvocationCount { add } => {
                let add = non_negative("add_invocation_count", add)?;
                self.create_from_invocation_count_diff(prev, add)
            }
            NonceDiff::FixedField {
                add,
                reset_invocation_count,
            } => {
                let add = non_negative("add_fixed_field", add)?;
                self.create_from_fixed_field_diff(prev, add, reset_invocation_count)
            }
        }
    }

    /// 计算 `current - prev`
    ///
    /// 仅依据 fixed field 是否相等选择差值类型。
    pub fn get_diff(prev: &[u8], current: &[u8]) -> Result<NonceDiff> {
        let prev = parse(prev)?;
        let current = parse(current)?;

        if prev.fixed_field == current.fixed_field {
            Ok(NonceDiff::InvocationCount {
                add: signed_delta(current.invocation_count, prev.invocation_count),
            })
        } else {
            Ok(NonceDiff::FixedField {
                add: signed_delta(current.fixed_field, prev.fixed_field),
                reset_invocation_count: current.invocation_count,
            })
        }
    }

    /// 折叠溢出、校验上限、更新状态并编码
    ///
    /// 返回值即为折叠后 `(fixed_field, invocation_count)` 的编码。
    fn build(
        &mut self,
        fixed_field: u128,
        invocation_count: u128,
        invocation_bytes: usize,
    ) -> Result<Vec<u8>> {
        let bits = (invocation_bytes * 8) as u32;
        let carry = invocation_count >> bits;
        let invocation_count = invocation_count & ((1u128 << bits) - 1);

        let fixed_field = fixed_field
            .checked_add(carry)
            .filter(|fixed| *fixed <= FIXED_FIELD_MAX)
            .ok_or(ArchiveError::NonceOverflow { bits: FIXED_FIELD_BITS })?;

        self.update_state(fixed_field, invocation_count);

        let mut nonce = Vec::with_capacity(FIXED_FIELD_BYTES + invocation_bytes);
        nonce.extend_from_slice(&fixed_field.to_le_bytes()[..FIXED_FIELD_BYTES]);
        nonce.extend_from_slice(&invocation_count.to_le_bytes()[..invocation_bytes]);
        Ok(nonce)
    }

    fn update_state(&mut self, fixed_field: u128, invocation_count: u128) {
        if fixed_field > self.fixed_field {
            self.fixed_field = fixed_field;
            self.invocation_count = invocation_count + 1;
        } else if fixed_field == self.fixed_field && self.invocation_count <= invocation_count {
            self.invocation_count = invocation_count + 1;
        } else {
            trace!("stale nonce input ignored");
        }
    }
}

fn validate_length(field: &str, byte_length: usize, min: usize) -> Result<()> {
    if !(min..=MAX_NONCE_BYTES).contains(&byte_length) {
        return Err(ArchiveError::out_of_range(
            field,
            format!("between {min} and {MAX_NONCE_BYTES}"),
            byte_length,
        ));
    }
    Ok(())
}

fn parse(nonce: &[u8]) -> Result<NonceFields> {
    validate_length("previous nonce byte length", nonce.len(), MIN_DIFF_NONCE_BYTES)?;

    let (fixed, invocation) = nonce.split_at(FIXED_FIELD_BYTES);
    Ok(NonceFields {
        fixed_field: read_le(fixed),
        invocation_count: read_le(invocation),
        invocation_bytes: invocation.len(),
    })
}

fn read_le(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .rev()
        .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte))
}

// 两个值都不超过 120 位，差值必然落在 i128 内
fn signed_delta(current: u128, prev: u128) -> i128 {
    current as i128 - prev as i128
}

fn non_negative(field: &str, value: i128) -> Result<u128> {
    u128::try_from(value).map_err(|_| ArchiveError::out_of_range(field, ">= 1", value))
}
