use crate::error::{AppError, FileError};
use crate::models::form_spec::FormSpec;
use crate::models::record::RecordInput;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载表单描述并校验
pub async fn load_form_spec(spec_path: &Path) -> Result<FormSpec> {
    ensure_exists(spec_path)?;

    let content = fs::read_to_string(spec_path)
        .await
        .with_context(|| format!("无法读取表单描述文件: {}", spec_path.display()))?;

    let spec: FormSpec = toml::from_str(&content)
        .with_context(|| format!("无法解析表单描述文件: {}", spec_path.display()))?;

    spec.validate()
        .with_context(|| format!("表单描述不合法: {}", spec_path.display()))?;

    tracing::info!(
        "表单描述已加载: {} ({} 个字段, {} 条级联链)",
        spec.name,
        spec.fields.len(),
        spec.cascade_chains().len()
    );

    Ok(spec)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(AppError::File(FileError::NotFound {
            path: path.display().to_string(),
        })
        .into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RecordFile {
    #[serde(default)]
    records: Vec<toml::Table>,
}

/// 从 TOML 文件加载记录列表
///
/// 文件格式为若干个 `[[records]]` 表，标量值一律转成字符串。
/// `start` 跳过前若干条，`limit` 限制加载条数。
pub async fn load_records(
    records_path: &Path,
    start: usize,
    limit: Option<usize>,
) -> Result<Vec<RecordInput>> {
    ensure_exists(records_path)?;

    let content = fs::read_to_string(records_path)
        .await
        .with_context(|| format!("无法读取记录文件: {}", records_path.display()))?;

    parse_records(&content, start, limit)
        .with_context(|| format!("无法解析记录文件: {}", records_path.display()))
}

fn parse_records(content: &str, start: usize, limit: Option<usize>) -> Result<Vec<RecordInput>> {
    let file: RecordFile = toml::from_str(content)?;

    let records = file
        .records
        .into_iter()
        .enumerate()
        .skip(start)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(i, table)| RecordInput::new(i + 1, flatten_table(i + 1, table)))
        .collect();

    Ok(records)
}

fn flatten_table(index: usize, table: toml::Table) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for (name, value) in table {
        let text = match value {
            toml::Value::String(s) => s.trim().to_string(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Datetime(d) => d.to_string(),
            other => {
                tracing::warn!(
                    "记录 {} 的字段 {} 不是标量 ({}), 已忽略",
                    index,
                    name,
                    other.type_str()
                );
                continue;
            }
        };
        fields.insert(name, text);
    }
    fields
}
