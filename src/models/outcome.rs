//! 提交结果与记录报告

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::FormError;
use crate::workflow::CascadeState;

/// 一次提交的结果
///
/// `Indeterminate` 表示既不能证明成功也不能证明失败，绝不能当作另外两种处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Success { identifier: String },
    Rejected { reason: String },
    Indeterminate { last_observed_state: String },
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success { .. })
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            SubmissionOutcome::Success { identifier } => Some(identifier),
            _ => None,
        }
    }
}

/// 处理流程中的阶段，失败时用于定位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Readiness,
    Resolution,
    Cascade,
    Write,
    Submission,
    Extraction,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Readiness => "readiness",
            Stage::Resolution => "resolution",
            Stage::Cascade => "cascade",
            Stage::Write => "write",
            Stage::Submission => "submission",
            Stage::Extraction => "extraction",
        };
        f.write_str(name)
    }
}

/// 某个阶段的失败：阶段 + 原因 + 失败时级联所处的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: FormError,
    /// 级联失败时，失败前最后的状态
    pub cascade_state: Option<CascadeState>,
}

impl StageFailure {
    pub fn new(stage: Stage, error: FormError) -> Self {
        Self {
            stage,
            error,
            cascade_state: None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.error.is_recoverable()
    }
}

impl Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cascade_state {
            Some(state) => write!(f, "[{} @ {:?}] {}", self.stage, state, self.error),
            None => write!(f, "[{}] {}", self.stage, self.error),
        }
    }
}

/// 报告中的结果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Success,
    Rejected,
    Indeterminate,
    Failed,
    Cancelled,
}

/// 面向编排器的单条记录报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReport {
    pub record_index: usize,
    pub idempotency_key: String,
    pub kind: ReportKind,
    pub identifier: Option<String>,
    pub stage: Option<Stage>,
    pub reason: Option<String>,
    pub attempts: u32,
    pub finished_at: String,
}

impl RecordReport {
    fn base(record_index: usize, key: &str, kind: ReportKind, attempts: u32) -> Self {
        Self {
            record_index,
            idempotency_key: key.to_string(),
            kind,
            identifier: None,
            stage: None,
            reason: None,
            attempts,
            finished_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 由提交结果生成报告
    pub fn from_outcome(
        record_index: usize,
        key: &str,
        outcome: &SubmissionOutcome,
        attempts: u32,
    ) -> Self {
        match outcome {
            SubmissionOutcome::Success { identifier } => Self {
                identifier: Some(identifier.clone()),
                ..Self::base(record_index, key, ReportKind::Success, attempts)
            },
            SubmissionOutcome::Rejected { reason } => Self {
                stage: Some(Stage::Extraction),
                reason: Some(reason.clone()),
                ..Self::base(record_index, key, ReportKind::Rejected, attempts)
            },
            SubmissionOutcome::Indeterminate { last_observed_state } => Self {
                stage: Some(Stage::Submission),
                reason: Some(last_observed_state.clone()),
                ..Self::base(record_index, key, ReportKind::Indeterminate, attempts)
            },
        }
    }

    /// 由阶段失败生成报告
    pub fn from_failure(
        record_index: usize,
        key: &str,
        failure: &StageFailure,
        attempts: u32,
    ) -> Self {
        Self {
            stage: Some(failure.stage),
            reason: Some(failure.to_string()),
            ..Self::base(record_index, key, ReportKind::Failed, attempts)
        }
    }

    /// 关闭过程中被中断
    pub fn cancelled(record_index: usize, key: &str, attempts: u32) -> Self {
        Self {
            reason: Some("程序关闭，处理被中断".to_string()),
            ..Self::base(record_index, key, ReportKind::Cancelled, attempts)
        }
    }

    /// 需要人工核对的记录
    pub fn needs_review(&self) -> bool {
        matches!(self.kind, ReportKind::Indeterminate | ReportKind::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indeterminate_report_keeps_its_own_kind() {
        let outcome = SubmissionOutcome::Indeterminate {
            last_observed_state: "connection reset".into(),
        };
        let report = RecordReport::from_outcome(4, "abc", &outcome, 1);
        assert_eq!(report.kind, ReportKind::Indeterminate);
        assert_eq!(report.identifier, None);
        assert!(report.needs_review());
    }

    #[test]
    fn failure_report_names_the_stage() {
        let failure = StageFailure {
            stage: Stage::Cascade,
            error: FormError::Driver("x".into()),
            cascade_state: Some(CascadeState::AwaitingChildRefresh),
        };
        let report = RecordReport::from_failure(2, "k", &failure, 3);
        assert_eq!(report.stage, Some(Stage::Cascade));
        assert!(report.reason.unwrap().contains("AwaitingChildRefresh"));
        assert_eq!(report.attempts, 3);
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = SubmissionOutcome::Success {
            identifier: "C2025XX-0007".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["identifier"], "C2025XX-0007");
    }
}
