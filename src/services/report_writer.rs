//! 报告写入服务 - 业务能力层
//!
//! 只负责"写结果文件 / 待核对文件"能力，不关心流程

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::RecordReport;

/// 报告写入服务
///
/// 职责：
/// - 每条记录一行 JSON 追加到结果文件
/// - 不确定或失败的记录再追加一行到待核对文件
pub struct ReportWriter {
    results_path: PathBuf,
    review_path: PathBuf,
    // 并发记录同时完成时保证整行写入
    lock: Mutex<()>,
}

impl ReportWriter {
    pub fn new(results_path: impl Into<PathBuf>, review_path: impl Into<PathBuf>) -> Self {
        Self {
            results_path: results_path.into(),
            review_path: review_path.into(),
            lock: Mutex::new(()),
        }
    }

    /// 写入一条记录报告
    pub async fn write(&self, report: &RecordReport) -> AppResult<()> {
        let line = serde_json::to_string(report)?;
        let _guard = self.lock.lock().await;

        debug!(
            "写入报告: 记录 {} | {:?} | 阶段 {:?}",
            report.record_index, report.kind, report.stage
        );
        append_line(&self.results_path, &line).await?;

        if report.needs_review() {
            append_line(&self.review_path, &line).await?;
        }

        Ok(())
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn review_path(&self) -> &Path {
        &self.review_path
    }
}

async fn append_line(path: &Path, line: &str) -> AppResult<()> {
    let write_failed = |e: std::io::Error| AppError::file_write_failed(path.display().to_string(), e);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(write_failed)?;
    file.write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(write_failed)?;
    file.flush().await.map_err(write_failed)?;
    Ok(())
}
