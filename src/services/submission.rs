//! 提交控制服务 - 业务能力层
//!
//! 每条逻辑记录只提交一次。幂等账本记录每个幂等键的最终结果，
//! 每次提交前先读账本。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, FormError};
use crate::infrastructure::{FormSession, SubmitDispatch};
use crate::models::{ControlRef, IdempotencyKey, Stage, StageFailure, SubmissionOutcome};
use crate::services::result_extractor::ResultExtractor;

/// 提交已下发、结果尚未取得时账本里记录的状态
///
/// 进程在这之后退出的话，下次运行会把这个键当作"结果不确定"交给人工核对。
pub const IN_FLIGHT_STATE: &str = "in-flight: 提交已下发，尚未取得结果";

/// 领取幂等键的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// 领取成功，调用方处理完后必须 [`IdempotencyLedger::release`]
    Acquired,
    /// 已有不应再次提交的结果（成功或不确定）
    Settled(SubmissionOutcome),
    /// 本进程内另一条记录正在处理同一个键
    Busy,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<IdempotencyKey, SubmissionOutcome>,
    /// 正在被处理的键，只在进程内有效
    claimed: HashSet<IdempotencyKey>,
}

/// 幂等账本
///
/// 进程内共享；配置了文件路径时启动加载、每次写入后整体落盘。
#[derive(Clone, Default)]
pub struct IdempotencyLedger {
    inner: Arc<Mutex<LedgerState>>,
    released: Arc<Notify>,
    path: Option<PathBuf>,
}

impl IdempotencyLedger {
    /// 仅进程内有效的账本
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 从文件加载账本，文件不存在时从空账本开始
    pub async fn persistent(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let entries = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };

        info!("幂等账本已加载: {} 条 ({})", entries.len(), path.display());
        Ok(Self {
            inner: Arc::new(Mutex::new(LedgerState {
                entries,
                claimed: HashSet::new(),
            })),
            released: Arc::new(Notify::new()),
            path: Some(path),
        })
    }

    pub async fn get(&self, key: &IdempotencyKey) -> Option<SubmissionOutcome> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// 检查并领取一个键，检查与领取在同一次加锁内完成
    pub async fn claim(&self, key: &IdempotencyKey) -> Claim {
        let mut state = self.inner.lock().await;
        if state.claimed.contains(key) {
            return Claim::Busy;
        }
        match state.entries.get(key) {
            Some(outcome) if !matches!(outcome, SubmissionOutcome::Rejected { .. }) => {
                Claim::Settled(outcome.clone())
            }
            _ => {
                state.claimed.insert(key.clone());
                Claim::Acquired
            }
        }
    }

    /// 领取一个键；正被其它记录处理时等它释放后再检查
    ///
    /// 不会返回 [`Claim::Busy`]。
    pub async fn claim_when_free(&self, key: &IdempotencyKey) -> Claim {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // 先登记再检查，检查之后的释放也能收到
            released.as_mut().enable();

            match self.claim(key).await {
                Claim::Busy => {
                    debug!("幂等键 {} 正在被另一条记录处理，等待释放", key.short());
                    released.await;
                }
                other => return other,
            }
        }
    }

    /// 释放领取的键
    pub async fn release(&self, key: &IdempotencyKey) {
        self.inner.lock().await.claimed.remove(key);
        self.released.notify_waiters();
    }

    /// 记录一个最终结果
    pub async fn record(&self, key: &IdempotencyKey, outcome: &SubmissionOutcome) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        state.entries.insert(key.clone(), outcome.clone());
        self.persist(&state.entries).await
    }

    /// 提交下发前标记为在途，返回原来的记录
    ///
    /// 落盘失败时内存中的记录也不变，调用方不应继续提交。
    pub async fn mark_in_flight(&self, key: &IdempotencyKey) -> AppResult<Option<SubmissionOutcome>> {
        let mut state = self.inner.lock().await;
        let in_flight = SubmissionOutcome::Indeterminate {
            last_observed_state: IN_FLIGHT_STATE.to_string(),
        };
        let previous = state.entries.insert(key.clone(), in_flight);
        if let Err(e) = self.persist(&state.entries).await {
            restore_entry(&mut state.entries, key, previous);
            return Err(e);
        }
        Ok(previous)
    }

    /// 提交确定没有下发时撤销在途标记
    pub async fn restore(
        &self,
        key: &IdempotencyKey,
        previous: Option<SubmissionOutcome>,
    ) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        restore_entry(&mut state.entries, key, previous);
        self.persist(&state.entries).await
    }

    // 调用方持锁，保证文件内容与内存一致
    async fn persist(&self, entries: &HashMap<IdempotencyKey, SubmissionOutcome>) -> AppResult<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(entries)?;
            tokio::fs::write(path, json)
                .await
                .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn restore_entry(
    entries: &mut HashMap<IdempotencyKey, SubmissionOutcome>,
    key: &IdempotencyKey,
    previous: Option<SubmissionOutcome>,
) {
    match previous {
        Some(outcome) => {
            entries.insert(key.clone(), outcome);
        }
        None => {
            entries.remove(key);
        }
    }
}

/// 提交控制服务
pub struct SubmissionController {
    ledger: IdempotencyLedger,
    submit_control: ControlRef,
    extractor: ResultExtractor,
    dispatch_timeout: Duration,
}

impl SubmissionController {
    pub fn new(
        ledger: IdempotencyLedger,
        submit_control: ControlRef,
        extractor: ResultExtractor,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            submit_control,
            extractor,
            dispatch_timeout,
        }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// 提交并提取结果
    ///
    /// - 账本中已是 `Success`：直接返回缓存结果，不再提交
    /// - 账本中是 `Indeterminate`：不重新提交，只对当前页面重新提取
    /// - 其它情况：先记为在途，下发一次提交动作，再提取结果
    ///
    /// 返回 `Err` 只表示提交动作确定没有下发。同一个键的并发调用由调用方
    /// 通过 [`IdempotencyLedger::claim`] 排除。
    pub async fn submit(
        &self,
        session: &mut FormSession,
        key: &IdempotencyKey,
    ) -> Result<SubmissionOutcome, StageFailure> {
        match self.ledger.get(key).await {
            Some(cached @ SubmissionOutcome::Success { .. }) => {
                info!("🔁 幂等键 {} 已成功提交过，返回缓存结果", key.short());
                return Ok(cached);
            }
            Some(SubmissionOutcome::Indeterminate { .. }) => {
                warn!("🔍 幂等键 {} 上次结果不确定，只重新提取不重新提交", key.short());
                let outcome = self.extractor.extract(session.driver()).await;
                self.record(key, &outcome).await;
                return Ok(outcome);
            }
            _ => {}
        }

        // 先落下在途标记再下发，之后无论何时中断这个键都不会被再次提交
        let previous = self.ledger.mark_in_flight(key).await.map_err(|e| {
            warn!("⚠️ 幂等账本写入失败，放弃本次提交 ({}): {}", key.short(), e);
            StageFailure::new(Stage::Submission, FormError::from(e))
        })?;

        info!("📤 {} 正在提交...", session);
        let dispatch = timeout(
            self.dispatch_timeout,
            session.driver().execute_submit(&self.submit_control),
        )
        .await;

        let outcome = match dispatch {
            Ok(Ok(SubmitDispatch::Sent)) => {
                session.mark_stale();
                self.extractor.extract(session.driver()).await
            }
            Ok(Ok(SubmitDispatch::LinkLost { detail })) => {
                session.mark_stale();
                warn!("⚠️ 提交过程中连接中断，结果不确定: {}", detail);
                SubmissionOutcome::Indeterminate {
                    last_observed_state: format!("提交时连接中断: {}", detail),
                }
            }
            Ok(Err(e)) => {
                // 确定没有下发，撤销在途标记
                if let Err(restore_err) = self.ledger.restore(key, previous).await {
                    warn!("⚠️ 撤销在途标记失败 ({}): {}", key.short(), restore_err);
                }
                return Err(StageFailure::new(Stage::Submission, FormError::from(e)));
            }
            Err(_) => {
                // 提交往返超时：请求可能已经到达服务端
                session.mark_stale();
                SubmissionOutcome::Indeterminate {
                    last_observed_state: format!(
                        "提交 {}ms 内没有返回",
                        self.dispatch_timeout.as_millis()
                    ),
                }
            }
        };

        self.record(key, &outcome).await;
        Ok(outcome)
    }

    async fn record(&self, key: &IdempotencyKey, outcome: &SubmissionOutcome) {
        if let Err(e) = self.ledger.record(key, outcome).await {
            // 账本写盘失败不改变本次结果，但必须让人看到
            warn!("⚠️ 幂等账本写入失败 ({}): {}", key.short(), e);
        }
    }
}
