//! 日志工具模块
//!
//! 初始化 tracing 订阅者，并提供日志格式化和输出的辅助函数
use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{AppError, AppResult};
use crate::models::{ReportKind, RecordReport};

/// 初始化日志订阅者
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug 或 info。
/// 传入日志文件时同时写入文件（不带颜色）。
pub fn init(verbose: bool, log_file: Option<File>) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = fmt::layer().with_target(false);
    let file = log_file.map(|file| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}

/// 初始化日志文件
///
/// 写入文件头后以追加模式重新打开，供日志订阅者继续写入
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> AppResult<File> {
    let log_header = format!(
        "{}\n表单录入日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .map_err(|e| AppError::file_write_failed(log_file_path, e))?;
    OpenOptions::new()
        .append(true)
        .open(log_file_path)
        .map_err(|e| AppError::file_write_failed(log_file_path, e))
}

/// 记录程序启动信息
///
/// # 参数
/// - `form`: 表单名称
/// - `max_concurrent`: 最大并发数
pub fn log_startup(form: &str, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 表单批量录入模式");
    info!("📝 表单: {}", form);
    info!("📊 最大并发数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录记录加载信息
pub fn log_records_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 条待处理的记录", total);
    info!("📋 将以每批 {} 条的方式处理", max_concurrent);
    info!("💡 每批完成后再开始下一批\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `total_batches`: 批次总数
/// - `start`: 起始记录编号
/// - `end`: 结束记录编号
/// - `total`: 记录总数
pub fn log_batch_start(
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("📄 本批记录: {}-{} / 共 {} 条", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, stats: &ProcessingStats) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 批完成: 成功 {}/{}",
        batch_num,
        stats.success,
        stats.processed()
    );
    info!("{}", "─".repeat(60));
}

/// 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub success: usize,
    pub rejected: usize,
    pub indeterminate: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ProcessingStats {
    pub fn add(&mut self, report: &RecordReport) {
        match report.kind {
            ReportKind::Success => self.success += 1,
            ReportKind::Rejected => self.rejected += 1,
            ReportKind::Indeterminate => self.indeterminate += 1,
            ReportKind::Failed => self.failed += 1,
            ReportKind::Cancelled => self.cancelled += 1,
        }
    }

    pub fn merge(&mut self, other: &ProcessingStats) {
        self.success += other.success;
        self.rejected += other.rejected;
        self.indeterminate += other.indeterminate;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }

    pub fn processed(&self) -> usize {
        self.success + self.rejected + self.indeterminate + self.failed + self.cancelled
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 统计结果
/// - `total`: 记录总数
/// - `review_path`: 待核对文件路径
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(stats: &ProcessingStats, total: usize, review_path: &str, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", stats.success, total);
    info!("🚫 被拒绝: {}", stats.rejected);
    info!("⚠️ 结果不确定: {}", stats.indeterminate);
    info!("❌ 失败: {}", stats.failed);
    if stats.cancelled > 0 {
        info!("🛑 已取消: {}", stats.cancelled);
    }
    info!("{}", "=".repeat(60));
    if stats.indeterminate + stats.failed > 0 {
        info!("📋 待人工核对的记录见: {}", review_path);
    }
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
