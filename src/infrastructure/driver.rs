//! 表单驱动接口 - 基础设施层
//!
//! 引擎对目标页面的全部要求就是这四个原语：导航、读取控件状态、
//! 给控件赋值、执行提交。任何浏览器自动化后端只要实现 [`FormDriver`]
//! 就能驱动引擎。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, Instant};

use crate::error::{AppResult, FormError, TimeoutDiagnostic};
use crate::models::{ControlRef, ControlState};

/// 提交动作的下发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitDispatch {
    /// 提交动作已下发
    Sent,
    /// 下发过程中连接中断，无法确定请求是否已经到达服务端
    LinkLost { detail: String },
}

/// 表单驱动
///
/// 返回 `Err` 表示操作确定没有生效（例如控件不存在、脚本执行失败）。
/// `execute_submit` 的"不确定"情况必须通过 [`SubmitDispatch::LinkLost`] 报告，
/// 不能用 `Err` 表示。
#[async_trait]
pub trait FormDriver: Send + Sync {
    /// 导航到目标地址
    async fn navigate(&self, url: &str) -> AppResult<()>;

    /// 读取控件当前渲染状态
    async fn read_control(&self, control: &ControlRef) -> AppResult<ControlState>;

    /// 给控件赋值（下拉框为机器值，开关类控件为触发值）
    async fn apply_value(&self, control: &ControlRef, value: &str) -> AppResult<()>;

    /// 执行提交动作
    async fn execute_submit(&self, control: &ControlRef) -> AppResult<SubmitDispatch>;

    /// 释放后端资源（关闭页面）
    async fn close(&self) -> AppResult<()>;
}

/// 会话工厂：每次处理尝试都从这里拿一个独立的驱动
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> AppResult<Box<dyn FormDriver>>;
}

/// 给一次驱动调用加上时限
///
/// 后端挂起时返回 `FormError::TimedOut`，诊断信息里写明是哪一次调用。
pub async fn bounded<T, F>(action: impl Display, limit: Duration, call: F) -> Result<T, FormError>
where
    F: Future<Output = AppResult<T>>,
{
    let start = Instant::now();
    match timeout(limit, call).await {
        Ok(result) => result.map_err(FormError::from),
        Err(_) => Err(FormError::TimedOut(TimeoutDiagnostic {
            predicate: action.to_string(),
            last_observed: "驱动调用没有返回".to_string(),
            elapsed: start.elapsed(),
        })),
    }
}
