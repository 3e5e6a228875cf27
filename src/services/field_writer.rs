//! 字段写入服务 - 业务能力层
//!
//! 写入之后必须回读确认，避免控件尚不可交互时的"静默无效写入"。

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FormError;
use crate::infrastructure::{bounded, FormDriver};
use crate::models::ControlRef;
use crate::services::readiness::{Predicate, Readiness, ReadinessMonitor};

/// 写入确认
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub control: String,
    pub value: String,
}

/// 字段写入服务
pub struct FieldWriter {
    monitor: ReadinessMonitor,
    presence_timeout: Duration,
    confirm_timeout: Duration,
}

impl FieldWriter {
    pub fn new(
        monitor: ReadinessMonitor,
        presence_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            monitor,
            presence_timeout,
            confirm_timeout,
        }
    }

    /// 写入并回读确认
    ///
    /// `reveal` 为需要先触发才会出现的控件提供触发器及其触发值。
    pub async fn write(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
        value: &str,
        reveal: Option<(&ControlRef, &str)>,
    ) -> Result<Confirmed, FormError> {
        if let Some((trigger, trigger_value)) = reveal {
            self.ensure_revealed(driver, control, trigger, trigger_value)
                .await?;
        }

        // 存在是写入的前提，而不是假设
        self.monitor
            .await_ready(
                driver,
                &Predicate::Present(control.clone()),
                self.presence_timeout,
            )
            .await
            .into_result()?;

        self.apply(driver, control, value).await?;

        let confirm = Predicate::ValueEquals(control.clone(), value.to_string());
        match self
            .monitor
            .await_ready(driver, &confirm, self.confirm_timeout)
            .await
        {
            Readiness::Ready { .. } => {
                debug!("✓ {} = {:?}", control, value);
                Ok(Confirmed {
                    control: control.name.clone(),
                    value: value.to_string(),
                })
            }
            Readiness::TimedOut(diagnostic) => {
                let action = format!("read({})", control.name);
                let observed = bounded(action, self.confirm_timeout, driver.read_control(control))
                    .await
                    .ok()
                    .and_then(|s| s.value);
                warn!(
                    "⚠️ {} 写入未生效: 期望 {:?}, 实际 {:?} ({})",
                    control, value, observed, diagnostic.last_observed
                );
                Err(FormError::WriteFailed {
                    control: control.name.clone(),
                    expected: value.to_string(),
                    observed,
                })
            }
        }
    }

    /// 控件不存在时先触发，再等待它出现
    async fn ensure_revealed(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
        trigger: &ControlRef,
        trigger_value: &str,
    ) -> Result<(), FormError> {
        let action = format!("read({})", control.name);
        let state = bounded(action, self.presence_timeout, driver.read_control(control)).await?;
        if state.present && state.interactive {
            return Ok(());
        }

        debug!("{} 尚未出现，触发 {}", control, trigger);
        self.monitor
            .await_ready(
                driver,
                &Predicate::Present(trigger.clone()),
                self.presence_timeout,
            )
            .await
            .into_result()?;
        self.apply(driver, trigger, trigger_value).await
    }

    async fn apply(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
        value: &str,
    ) -> Result<(), FormError> {
        let action = format!("apply({})", control.name);
        bounded(action, self.presence_timeout, driver.apply_value(control, value)).await
    }
}
