//! 记录输入与幂等键

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// 一条逻辑记录（一次表单提交的全部原始数据）
///
/// 被编排器接收后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInput {
    index: usize,
    fields: BTreeMap<String, String>,
}

impl RecordInput {
    pub fn new(index: usize, fields: BTreeMap<String, String>) -> Self {
        Self { index, fields }
    }

    /// 记录序号（从1开始，仅用于日志）
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// 由记录内容确定性地生成幂等键
    ///
    /// `key_fields` 为空时使用全部字段。缺失的字段按空值参与计算。
    pub fn idempotency_key(&self, key_fields: &[String]) -> IdempotencyKey {
        let mut hasher = blake3::Hasher::new();
        let mut write_pair = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        };

        if key_fields.is_empty() {
            for (name, value) in &self.fields {
                write_pair(name, value);
            }
        } else {
            let mut names: Vec<&String> = key_fields.iter().collect();
            names.sort();
            names.dedup();
            for name in names {
                write_pair(name, self.get(name).unwrap_or_default());
            }
        }

        IdempotencyKey(hasher.finalize().to_hex().to_string())
    }
}

/// 幂等键：逻辑记录内容的确定性指纹
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志里只显示前12位
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
