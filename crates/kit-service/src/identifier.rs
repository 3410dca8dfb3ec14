//! 标识符生成
//!
//! 采样盒编号取自去掉易混淆字母 i/l/o 的 23 个小写字母，
//! 密码与验证码为首位非零的数字串，条码为定宽补零数字。

use std::collections::HashSet;

use rand::Rng;

use crate::error::{KitError, Result};

/// 采样盒编号字母表
pub const KIT_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz";

/// 默认编号长度
pub const DEFAULT_KIT_ID_LENGTH: usize = 8;

/// 默认条码宽度
pub const DEFAULT_BARCODE_WIDTH: usize = 9;

const DIGITS: &[u8] = b"0123456789";
const NONZERO_DIGITS: &[u8] = b"123456789";

/// 生成采样盒编号，不做唯一性检查
pub fn generate_kit_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(KIT_ALPHABET[rng.random_range(0..KIT_ALPHABET.len())]))
        .collect()
}

/// 生成不在 `existing` 中的采样盒编号
///
/// `existing` 必须是与插入处于同一事务内取得的全部编号快照。
/// 同长度的编号空间已被占满时返回错误，而不是无限循环。
pub fn ensure_unique_kit_id(existing: &HashSet<String>, length: usize) -> Result<String> {
    if length == 0 {
        return Err(KitError::Validation("采样盒编号长度必须大于 0".to_string()));
    }

    if let Some(space) = u32::try_from(length)
        .ok()
        .and_then(|len| KIT_ALPHABET.len().checked_pow(len))
    {
        let taken = existing
            .iter()
            .filter(|id| is_valid_kit_id(id, length))
            .count();
        if taken >= space {
            return Err(KitError::Validation(format!(
                "长度为 {length} 的采样盒编号已全部分配"
            )));
        }
    }

    loop {
        let candidate = generate_kit_id(length);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }
}

/// 是否为合法的采样盒编号
pub fn is_valid_kit_id(id: &str, length: usize) -> bool {
    id.len() == length && id.bytes().all(|b| KIT_ALPHABET.contains(&b))
}

/// 生成数字串
///
/// `allow_zero_first` 为 false 时首位取 1-9，避免打印时丢失前导零
pub fn generate_numeric_code(length: usize, allow_zero_first: bool) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|i| {
            let pool = if i == 0 && !allow_zero_first {
                NONZERO_DIGITS
            } else {
                DIGITS
            };
            char::from(pool[rng.random_range(0..pool.len())])
        })
        .collect()
}

/// 采样盒密码（明文，入库前需哈希）
pub fn generate_password(length: usize) -> String {
    generate_numeric_code(length, false)
}

pub fn generate_verification_code(length: usize) -> String {
    generate_numeric_code(length, false)
}

/// 序列号格式化为定宽条码
pub fn format_barcode(sequence: i64, width: usize) -> String {
    format!("{sequence:0width$}")
}
