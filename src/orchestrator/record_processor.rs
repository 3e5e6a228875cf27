//! 单条记录处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一条记录的全部尝试，是记录级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **领取幂等键**：已成功的记录直接返回缓存结果，结果不确定的记录交给人工核对，
//!    同一个键同时只有一条记录在处理
//! 2. **会话管理**：每次尝试打开一个新会话，无论结果如何都在尝试结束时关闭
//! 3. **有限重试**：可恢复的失败换新会话重试，超过次数后报告最后一次失败
//! 4. **取消**：收到关闭信号时中断当前尝试，照样关闭会话

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::FormError;
use crate::infrastructure::{FormSession, SessionFactory};
use crate::models::{IdempotencyKey, RecordInput, RecordReport, Stage, StageFailure};
use crate::services::Claim;
use crate::workflow::{RecordCtx, RecordFlow};

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// 处理单条记录
///
/// # 参数
/// - `factory`: 会话工厂（每次尝试打开一个新页面）
/// - `flow`: 记录处理流程
/// - `record`: 记录数据
/// - `policy`: 重试策略
/// - `shutdown`: 关闭信号
///
/// # 返回
/// 返回这条记录的最终报告
pub async fn process_record(
    factory: &dyn SessionFactory,
    flow: &RecordFlow,
    record: &RecordInput,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> RecordReport {
    let index = record.index();
    let key = record.idempotency_key(&flow.spec().idempotency_fields);

    log_record_start(record, key.short());

    // ========== 领取幂等键 ==========
    // 同一批里重复的记录在这里排队，不会同时提交
    let claim = tokio::select! {
        claim = flow.ledger().claim_when_free(&key) => claim,
        _ = shutdown_requested(&mut shutdown) => {
            return RecordReport::cancelled(index, key.as_str(), 0);
        }
    };
    if let Claim::Settled(outcome) = claim {
        if outcome.is_success() {
            info!("[记录 {}] 🔁 已成功提交过，跳过: {:?}", index, outcome.identifier());
        } else {
            warn!("[记录 {}] ⚠️ 上次提交结果不确定，不再自动提交，等待人工核对", index);
        }
        return RecordReport::from_outcome(index, key.as_str(), &outcome, 0);
    }

    let report = run_attempts(factory, flow, record, &key, policy, &mut shutdown).await;
    flow.ledger().release(&key).await;
    report
}

/// 领取到幂等键之后的有限次尝试
async fn run_attempts(
    factory: &dyn SessionFactory,
    flow: &RecordFlow,
    record: &RecordInput,
    key: &IdempotencyKey,
    policy: RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> RecordReport {
    let index = record.index();
    let mut last_failure: Option<StageFailure> = None;
    let mut attempts = 0;

    for attempt in 1..=policy.max_attempts {
        if *shutdown.borrow() {
            return RecordReport::cancelled(index, key.as_str(), attempts);
        }
        attempts = attempt;
        let ctx = RecordCtx::new(index, attempt, key.clone());

        let driver = match factory.open().await {
            Ok(driver) => driver,
            Err(e) => {
                error!("{} ❌ 打开会话失败: {}", ctx, e);
                last_failure = Some(StageFailure::new(Stage::Readiness, FormError::from(e)));
                if !wait_before_retry(&ctx, policy, shutdown).await {
                    return RecordReport::cancelled(index, key.as_str(), attempts);
                }
                continue;
            }
        };
        let mut session = FormSession::new(driver, flow.spec().url.clone());

        let result = tokio::select! {
            result = flow.run(&mut session, record, &ctx) => Some(result),
            _ = shutdown_requested(shutdown) => None,
        };

        // 无论结果如何都释放会话
        session.close().await;

        match result {
            None => {
                warn!("{} 🛑 收到关闭信号，处理被中断", ctx);
                return RecordReport::cancelled(index, key.as_str(), attempts);
            }
            Some(Ok(outcome)) => {
                let report = RecordReport::from_outcome(index, key.as_str(), &outcome, attempts);
                log_record_complete(&report);
                return report;
            }
            Some(Err(failure)) => {
                warn!("{} ❌ 失败 {}", ctx, failure);
                let recoverable = failure.is_recoverable();
                last_failure = Some(failure);
                if !recoverable {
                    break;
                }
                if attempt < policy.max_attempts
                    && !wait_before_retry(&ctx, policy, shutdown).await
                {
                    return RecordReport::cancelled(index, key.as_str(), attempts);
                }
            }
        }
    }

    let failure = last_failure.unwrap_or_else(|| {
        StageFailure::new(
            Stage::Readiness,
            FormError::Driver("没有进行任何尝试".to_string()),
        )
    });
    let report = RecordReport::from_failure(index, key.as_str(), &failure, attempts);
    log_record_complete(&report);
    report
}

/// 重试前等待，期间收到关闭信号返回 false
async fn wait_before_retry(
    ctx: &RecordCtx,
    policy: RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if ctx.attempt >= policy.max_attempts {
        return true;
    }
    info!(
        "{} 🔄 {}ms 后用新会话重试 ({}/{})",
        ctx,
        policy.retry_delay.as_millis(),
        ctx.attempt + 1,
        policy.max_attempts
    );
    tokio::select! {
        _ = sleep(policy.retry_delay) => true,
        _ = shutdown_requested(shutdown) => false,
    }
}

/// 等待关闭信号；发送端已经不存在时永远不会返回
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ========== 日志辅助函数 ==========

fn log_record_start(record: &RecordInput, key: &str) {
    info!("\n[记录 {}] {}", record.index(), "─".repeat(30));
    info!("[记录 {}] 开始处理 (幂等键 {})", record.index(), key);
    let fields: Vec<String> = record
        .fields()
        .iter()
        .map(|(k, v)| format!("{}={}", k, crate::utils::logging::truncate_text(v, 30)))
        .collect();
    info!("[记录 {}] 字段: {}", record.index(), fields.join(" | "));
}

fn log_record_complete(report: &RecordReport) {
    match &report.identifier {
        Some(id) => info!(
            "[记录 {}] ✅ 完成: {:?} 编号 {} (尝试 {} 次)",
            report.record_index, report.kind, id, report.attempts
        ),
        None => warn!(
            "[记录 {}] 结束: {:?} 阶段 {:?} 原因 {} (尝试 {} 次)",
            report.record_index,
            report.kind,
            report.stage,
            report.reason.as_deref().unwrap_or("-"),
            report.attempts
        ),
    }
}
