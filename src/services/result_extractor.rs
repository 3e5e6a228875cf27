//! 结果提取服务 - 业务能力层
//!
//! 提交后先找成功提示，再找错误提示；都没有就是"不确定"。

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{AppResult, FormError};
use crate::infrastructure::{bounded, FormDriver};
use crate::models::{ControlRef, ControlState, ExtractionSpec, SubmissionOutcome};
use crate::services::readiness::{Predicate, Readiness, ReadinessMonitor};

/// 标识符格式不符时的拒绝原因
pub const UNPARSABLE_IDENTIFIER: &str = "unparsable-identifier";

/// 结果提取服务
pub struct ResultExtractor {
    monitor: ReadinessMonitor,
    success_region: ControlRef,
    error_region: ControlRef,
    identifier_region: ControlRef,
    identifier_pattern: Regex,
    pattern_version: u32,
    wait: Duration,
}

impl ResultExtractor {
    pub fn new(monitor: ReadinessMonitor, spec: &ExtractionSpec, wait: Duration) -> AppResult<Self> {
        Ok(Self {
            monitor,
            success_region: spec.success_region(),
            error_region: spec.error_region(),
            identifier_region: spec.identifier_region(),
            identifier_pattern: spec.compile_pattern()?,
            pattern_version: spec.pattern_version,
            wait,
        })
    }

    /// 从当前页面状态提取提交结果
    pub async fn extract(&self, driver: &dyn FormDriver) -> SubmissionOutcome {
        let signal = Predicate::Any(vec![
            Predicate::TextPresent(self.success_region.clone()),
            Predicate::TextPresent(self.error_region.clone()),
        ]);

        if let Readiness::TimedOut(diagnostic) =
            self.monitor.await_ready(driver, &signal, self.wait).await
        {
            warn!("⚠️ 提交后 {}ms 内没有成功或错误提示", self.wait.as_millis());
            return SubmissionOutcome::Indeterminate {
                last_observed_state: diagnostic.last_observed,
            };
        }

        // 成功提示优先
        match self.read(driver, &self.success_region).await {
            Ok(state) if state.visible_text().is_some() => {
                return self.parse_identifier(driver).await;
            }
            Ok(_) => {}
            Err(e) => debug!("读取成功提示失败: {}", e),
        }

        match self.read(driver, &self.error_region).await {
            Ok(state) => match state.visible_text() {
                Some(reason) => {
                    warn!("❌ 提交被拒绝: {}", reason);
                    SubmissionOutcome::Rejected {
                        reason: reason.to_string(),
                    }
                }
                None => SubmissionOutcome::Indeterminate {
                    last_observed_state: "提示区域在读取时消失".to_string(),
                },
            },
            Err(e) => SubmissionOutcome::Indeterminate {
                last_observed_state: format!("读取错误提示失败: {}", e),
            },
        }
    }

    async fn read(
        &self,
        driver: &dyn FormDriver,
        region: &ControlRef,
    ) -> Result<ControlState, FormError> {
        let action = format!("read({})", region.name);
        bounded(action, self.wait, driver.read_control(region)).await
    }

    async fn parse_identifier(&self, driver: &dyn FormDriver) -> SubmissionOutcome {
        let text = match self.read(driver, &self.identifier_region).await {
            Ok(state) => {
                // 输入框里的编号在 value 上，其它区域在文本上
                let mut text = state.visible_text().unwrap_or_default().to_string();
                if let Some(value) = state.value.as_deref() {
                    text.push('\n');
                    text.push_str(value);
                }
                text
            }
            Err(e) => {
                return SubmissionOutcome::Indeterminate {
                    last_observed_state: format!("成功提示已出现但读取编号失败: {}", e),
                }
            }
        };

        match extract_identifier(&self.identifier_pattern, &text) {
            Some(identifier) => {
                info!(
                    "✅ 提交成功, 编号 {} (规则 v{})",
                    identifier, self.pattern_version
                );
                SubmissionOutcome::Success { identifier }
            }
            None => {
                warn!(
                    "⚠️ 成功提示中没有符合规则 v{} 的编号: {}",
                    self.pattern_version,
                    crate::utils::logging::truncate_text(&text, 80)
                );
                SubmissionOutcome::Rejected {
                    reason: UNPARSABLE_IDENTIFIER.to_string(),
                }
            }
        }
    }
}

/// 在文本中查找完整匹配的标识符
///
/// 匹配两侧必须不是字母数字，避免从更长的串里截出一段。
pub fn extract_identifier(pattern: &Regex, text: &str) -> Option<String> {
    pattern.find_iter(text).find_map(|m| {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        let is_edge = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
        (is_edge(before) && is_edge(after) && !m.as_str().is_empty())
            .then(|| m.as_str().to_string())
    })
}
