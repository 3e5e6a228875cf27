//! 级联协调 - 流程层
//!
//! 父控件的选择会改变子控件的合法选项集。每一对 (父, 子) 是一个小状态机：
//!
//! ```text
//! Idle → ParentSelecting → AwaitingChildRefresh → ChildSelecting → Settled
//!   └──────────┴───────────────────┴────────────────────┴──→ Failed
//! ```
//!
//! 多层级联由多个状态机首尾相接组成：第 i 对的子控件写入就是第 i+1 对的父控件写入。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::FormError;
use crate::infrastructure::{bounded, FormSession};
use crate::models::{ControlRef, ResolvedSelection, Stage, StageFailure};
use crate::services::{FieldWriter, Predicate, Readiness, ReadinessMonitor, SelectorResolver};

/// 级联状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    ParentSelecting,
    AwaitingChildRefresh,
    ChildSelecting,
    Settled,
    Failed,
}

impl CascadeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CascadeState::Settled | CascadeState::Failed)
    }

    /// 合法的状态转换
    pub fn can_advance_to(self, next: CascadeState) -> bool {
        use CascadeState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, ParentSelecting)
            | (ParentSelecting, AwaitingChildRefresh)
            | (AwaitingChildRefresh, ChildSelecting)
            | (ChildSelecting, Settled) => true,
            _ => false,
        }
    }
}

/// 一对 (父, 子) 控件的状态机
#[derive(Debug, Clone)]
pub struct CascadeLink {
    pub parent: String,
    pub child: String,
    state: CascadeState,
    history: Vec<CascadeState>,
}

impl CascadeLink {
    fn new(parent: &str, child: &str) -> Self {
        Self {
            parent: parent.to_string(),
            child: child.to_string(),
            state: CascadeState::Idle,
            history: vec![CascadeState::Idle],
        }
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    /// 经历过的全部状态（含初始 Idle）
    pub fn history(&self) -> &[CascadeState] {
        &self.history
    }

    fn advance(&mut self, next: CascadeState) {
        if !self.state.can_advance_to(next) {
            warn!(
                "级联 {}→{} 非法转换 {:?} → {:?}，已忽略",
                self.parent, self.child, self.state, next
            );
            return;
        }
        debug!(
            "级联 {}→{}: {:?} → {:?}",
            self.parent, self.child, self.state, next
        );
        self.state = next;
        self.history.push(next);
    }

    /// 标记失败，返回失败前的状态
    fn fail(&mut self) -> CascadeState {
        let before = self.state;
        self.advance(CascadeState::Failed);
        before
    }
}

/// 级联链中的一层
#[derive(Debug, Clone)]
pub struct CascadeLevel {
    pub control: ControlRef,
    /// 下拉框为期望的显示文本，其它控件为要写入的值
    pub desired: String,
    /// 是否需要按显示文本解析
    pub select: bool,
    /// 动态控件的触发器及触发值
    pub reveal: Option<(ControlRef, String)>,
}

/// 已确认写入的一层
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledLevel {
    pub field: String,
    pub value: String,
    /// 下拉框的解析结果
    pub selection: Option<ResolvedSelection>,
}

/// 一次级联链的执行
pub struct CascadeRun {
    levels: Vec<CascadeLevel>,
    links: Vec<CascadeLink>,
}

impl CascadeRun {
    pub fn new(levels: Vec<CascadeLevel>) -> Self {
        let links = levels
            .windows(2)
            .map(|pair| CascadeLink::new(&pair[0].control.name, &pair[1].control.name))
            .collect();
        Self { levels, links }
    }

    pub fn links(&self) -> &[CascadeLink] {
        &self.links
    }

    /// 把第 i 层相关的状态机全部标记失败，返回用于报告的那一个的失败前状态
    ///
    /// 第 i 层作为子控件所在的那一对优先（i > 0 时）。
    fn fail_at(&mut self, level: usize) -> Option<CascadeState> {
        let as_child = level.checked_sub(1).map(|i| self.links[i].fail());
        let as_parent = self
            .links
            .get_mut(level)
            .filter(|l| !l.state.is_terminal())
            .map(|l| l.fail());
        as_child.or(as_parent)
    }
}

/// 级联协调器
pub struct CascadeCoordinator<'a> {
    monitor: &'a ReadinessMonitor,
    resolver: &'a SelectorResolver,
    writer: &'a FieldWriter,
    refresh_timeout: Duration,
}

impl<'a> CascadeCoordinator<'a> {
    pub fn new(
        monitor: &'a ReadinessMonitor,
        resolver: &'a SelectorResolver,
        writer: &'a FieldWriter,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            monitor,
            resolver,
            writer,
            refresh_timeout,
        }
    }

    /// 依次解析并写入整条级联链
    pub async fn drive(
        &self,
        session: &mut FormSession,
        run: &mut CascadeRun,
    ) -> Result<Vec<SettledLevel>, StageFailure> {
        let mut settled = Vec::with_capacity(run.levels.len());
        let mut parent_value: Option<String> = None;
        let mut baseline = None;

        for i in 0..run.levels.len() {
            let level = run.levels[i].clone();
            let has_child = i + 1 < run.levels.len();

            // 作为子控件：等待选项集相对基线刷新
            if i > 0 {
                if let Some(base) = baseline.take() {
                    let refreshed = Predicate::OptionsChanged {
                        control: level.control.clone(),
                        baseline: base,
                    };
                    let readiness = self
                        .monitor
                        .await_ready(session.driver(), &refreshed, self.refresh_timeout)
                        .await;
                    if let Readiness::TimedOut(diagnostic) = readiness {
                        warn!(
                            "❌ {} 的选项在 {}ms 内没有刷新，父控件的选择可能没有生效",
                            level.control,
                            self.refresh_timeout.as_millis()
                        );
                        let state = run.fail_at(i);
                        return Err(StageFailure {
                            stage: Stage::Cascade,
                            error: FormError::TimedOut(diagnostic),
                            cascade_state: state,
                        });
                    }
                }
                run.links[i - 1].advance(CascadeState::ChildSelecting);
            }

            // 作为父控件：开始选择
            if has_child {
                run.links[i].advance(CascadeState::ParentSelecting);
            }

            let (value, selection) = if level.select {
                match self
                    .resolver
                    .resolve(
                        session.driver(),
                        &level.control,
                        &level.desired,
                        parent_value.as_deref(),
                    )
                    .await
                {
                    Ok(selection) => (selection.value.clone(), Some(selection)),
                    Err(error) => {
                        warn!("❌ 解析 {} '{}' 失败: {}", level.control, level.desired, error);
                        let state = run.fail_at(i);
                        return Err(StageFailure {
                            stage: Stage::Resolution,
                            error,
                            cascade_state: state,
                        });
                    }
                }
            } else {
                (level.desired.clone(), None)
            };

            // 已经是目标值时不再写入，子控件的选项集已经属于这个值
            let current = bounded(
                format!("read({})", level.control.name),
                self.refresh_timeout,
                session.driver().read_control(&level.control),
            )
            .await
            .ok()
            .and_then(|s| s.value);
            let unchanged = current.as_deref().map(str::trim) == Some(value.trim());

            if unchanged {
                debug!("{} 已是 {:?}，跳过写入", level.control, value);
            } else {
                if has_child {
                    // 基线必须在父控件写入之前采集
                    let child = &run.levels[i + 1].control;
                    baseline = match self.resolver.fingerprint(session.driver(), child).await {
                        Ok(fp) => Some(fp),
                        Err(error) => {
                            let state = run.fail_at(i);
                            return Err(StageFailure {
                                stage: Stage::Cascade,
                                error,
                                cascade_state: state,
                            });
                        }
                    };
                }

                if let Err(error) = self
                    .writer
                    .write(
                        session.driver(),
                        &level.control,
                        &value,
                        level.reveal.as_ref().map(|(c, v)| (c, v.as_str())),
                    )
                    .await
                {
                    let state = run.fail_at(i);
                    return Err(StageFailure {
                        stage: Stage::Write,
                        error,
                        cascade_state: state,
                    });
                }
                session.mark_good();
            }

            if i > 0 {
                run.links[i - 1].advance(CascadeState::Settled);
            }
            if has_child {
                run.links[i].advance(CascadeState::AwaitingChildRefresh);
            }

            match &selection {
                Some(sel) => info!("✓ {} 已选择: {}", level.control, sel.label),
                None => info!("✓ {} 已写入: {}", level.control, value),
            }
            settled.push(SettledLevel {
                field: level.control.name.clone(),
                value: value.clone(),
                selection,
            });
            parent_value = Some(value);
        }

        Ok(settled)
    }
}
