//! 记录处理上下文
//!
//! 封装"我正在处理第几条记录的第几次尝试"这一信息

use std::fmt::Display;

use crate::models::IdempotencyKey;

/// 记录处理上下文
#[derive(Debug, Clone)]
pub struct RecordCtx {
    /// 记录序号（仅用于日志显示）
    pub record_index: usize,

    /// 当前尝试次数（从1开始）
    pub attempt: u32,

    /// 记录的幂等键
    pub key: IdempotencyKey,
}

impl RecordCtx {
    /// 创建新的记录上下文
    pub fn new(record_index: usize, attempt: u32, key: IdempotencyKey) -> Self {
        Self {
            record_index,
            attempt,
            key,
        }
    }
}

impl Display for RecordCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[记录 {} 尝试#{} 键#{}]",
            self.record_index,
            self.attempt,
            self.key.short()
        )
    }
}
