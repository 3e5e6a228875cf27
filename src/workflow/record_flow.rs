//! 记录处理流程 - 流程层
//!
//! 核心职责：定义"一条记录"一次尝试的完整处理流程
//!
//! 流程顺序（固定，不允许重排）：
//! 1. 导航 → 等待页面就绪
//! 2. 级联链：父控件选择 → 等待子控件刷新 → 子控件选择
//! 3. 其余字段逐个写入并确认
//! 4. 提交 → 提取结果

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Timeouts;
use crate::error::AppResult;
use crate::infrastructure::FormSession;
use crate::models::{
    FieldSpec, FormSpec, RecordInput, Stage, StageFailure, SubmissionOutcome, ValueContext,
};
use crate::services::{
    FieldWriter, IdempotencyLedger, Predicate, ReadinessMonitor, ResultExtractor,
    SelectorResolver, SubmissionController,
};
use crate::workflow::cascade::{CascadeCoordinator, CascadeLevel, CascadeRun};
use crate::workflow::record_ctx::RecordCtx;

/// 记录处理流程
///
/// - 编排一条记录一次尝试的完整流程
/// - 不持有页面，会话由调用方传入并负责释放
/// - 只依赖业务能力（services）
pub struct RecordFlow {
    spec: Arc<FormSpec>,
    timeouts: Timeouts,
    monitor: ReadinessMonitor,
    resolver: SelectorResolver,
    writer: FieldWriter,
    submission: SubmissionController,
}

impl RecordFlow {
    /// 创建新的记录处理流程
    pub fn new(spec: Arc<FormSpec>, timeouts: Timeouts, ledger: IdempotencyLedger) -> AppResult<Self> {
        let monitor = ReadinessMonitor::new(timeouts.poll_interval);
        let extractor = ResultExtractor::new(monitor.clone(), &spec.extraction, timeouts.extraction)?;
        let submission = SubmissionController::new(
            ledger,
            spec.submit_control(),
            extractor,
            timeouts.extraction,
        );
        let writer = FieldWriter::new(monitor.clone(), timeouts.ready, timeouts.write_confirm);

        Ok(Self {
            spec,
            timeouts,
            monitor,
            resolver: SelectorResolver::new(timeouts.ready),
            writer,
            submission,
        })
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        self.submission.ledger()
    }

    /// 执行一次尝试
    pub async fn run(
        &self,
        session: &mut FormSession,
        record: &RecordInput,
        ctx: &RecordCtx,
    ) -> Result<SubmissionOutcome, StageFailure> {
        info!("{} {} 开始处理", ctx, session);

        // ========== 1. 页面就绪 ==========
        self.await_page(session, ctx).await?;

        // ========== 2. 级联链 ==========
        let mut values = ValueContext::default();
        for chain in self.spec.cascade_chains() {
            self.settle_chain(session, record, &chain, &mut values, ctx)
                .await?;
        }

        // ========== 3. 其余字段 ==========
        for field in self.spec.simple_fields() {
            self.write_field(session, record, field, &mut values, ctx)
                .await?;
        }

        // ========== 4. 提交并提取结果 ==========
        let outcome = self.submission.submit(session, &ctx.key).await?;
        match &outcome {
            SubmissionOutcome::Success { identifier } => {
                info!("{} ✅ 提交成功，编号: {}", ctx, identifier)
            }
            SubmissionOutcome::Rejected { reason } => {
                error!("{} ❌ 提交被拒绝: {}", ctx, reason)
            }
            SubmissionOutcome::Indeterminate {
                last_observed_state,
            } => warn!("{} ⚠️ 提交结果不确定: {}", ctx, last_observed_state),
        }
        Ok(outcome)
    }

    async fn await_page(&self, session: &mut FormSession, ctx: &RecordCtx) -> Result<(), StageFailure> {
        session
            .load(self.timeouts.ready)
            .await
            .map_err(|e| {
                warn!("{} ❌ 页面加载失败: {}", ctx, e);
                StageFailure::new(Stage::Readiness, e)
            })?;

        if !self.spec.ready.is_empty() {
            let predicate =
                Predicate::All(self.spec.ready.iter().map(Predicate::from_spec).collect());
            self.monitor
                .await_ready(session.driver(), &predicate, self.timeouts.ready)
                .await
                .into_result()
                .map_err(|e| {
                    session.mark_stale();
                    warn!("{} ❌ 页面未就绪: {}", ctx, e);
                    StageFailure::new(Stage::Readiness, e)
                })?;
        }

        session.mark_good();
        info!("{} ✓ 页面已就绪", ctx);
        Ok(())
    }

    async fn settle_chain(
        &self,
        session: &mut FormSession,
        record: &RecordInput,
        chain: &[&FieldSpec],
        values: &mut ValueContext,
        ctx: &RecordCtx,
    ) -> Result<(), StageFailure> {
        let mut levels = Vec::with_capacity(chain.len());
        for field in chain {
            let desired = field
                .value
                .render(&field.name, record, values)
                .map_err(|e| StageFailure::new(Stage::Resolution, e))?;
            levels.push(CascadeLevel {
                control: field.control(),
                desired,
                select: field.kind.is_select(),
                reveal: field
                    .reveal_control()
                    .map(|(control, value)| (control, value.to_string())),
            });
        }

        let names: Vec<&str> = chain.iter().map(|f| f.name.as_str()).collect();
        info!("{} 🔗 级联: {}", ctx, names.join(" → "));

        let coordinator = CascadeCoordinator::new(
            &self.monitor,
            &self.resolver,
            &self.writer,
            self.timeouts.cascade_refresh,
        );
        let mut run = CascadeRun::new(levels);
        let settled = coordinator.drive(session, &mut run).await.map_err(|failure| {
            error!("{} ❌ 级联失败 {}", ctx, failure);
            failure
        })?;

        for level in settled {
            if let Some(selection) = &level.selection {
                values
                    .labels
                    .insert(level.field.clone(), selection.label.clone());
            }
            values.values.insert(level.field, level.value);
        }
        Ok(())
    }

    async fn write_field(
        &self,
        session: &mut FormSession,
        record: &RecordInput,
        field: &FieldSpec,
        values: &mut ValueContext,
        ctx: &RecordCtx,
    ) -> Result<(), StageFailure> {
        let rendered = field
            .value
            .render(&field.name, record, values)
            .map_err(|e| StageFailure::new(Stage::Resolution, e))?;

        let control = field.control();
        let reveal = field.reveal_control();
        let reveal = reveal.as_ref().map(|(c, v)| (c, *v));

        let value = if field.kind.is_select() {
            let selection = self
                .resolver
                .resolve(session.driver(), &control, &rendered, None)
                .await
                .map_err(|e| {
                    warn!("{} ❌ 解析 {} '{}' 失败: {}", ctx, control, rendered, e);
                    StageFailure::new(Stage::Resolution, e)
                })?;
            values
                .labels
                .insert(field.name.clone(), selection.label.clone());
            selection.value
        } else {
            rendered
        };

        self.writer
            .write(session.driver(), &control, &value, reveal)
            .await
            .map_err(|e| {
                warn!("{} ❌ 写入 {} 失败: {}", ctx, control, e);
                StageFailure::new(Stage::Write, e)
            })?;
        session.mark_good();

        info!(
            "{} ✓ {} = {}",
            ctx,
            field.name,
            crate::utils::logging::truncate_text(&value, 40)
        );
        values.values.insert(field.name.clone(), value);
        Ok(())
    }
}
