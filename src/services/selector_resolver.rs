//! 选择器解析服务 - 业务能力层
//!
//! 把人能看懂的显示文本（如线路名）映射成下拉框的机器值。

use std::fmt::{self, Display};
use std::time::Duration;

use tracing::debug;

use crate::error::FormError;
use crate::infrastructure::{bounded, FormDriver};
use crate::models::{ControlRef, ControlState, ResolvedSelection, SelectOption};

/// 选项集指纹：选项 (value, label) 列表的 blake3 摘要
///
/// 级联子控件只有在指纹相对基线发生变化后才允许解析。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionFingerprint(String);

impl OptionFingerprint {
    pub fn of(options: &[SelectOption]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for option in options {
            hasher.update(option.value.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(option.label.as_bytes());
            hasher.update(&[0x1e]);
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }
}

impl Display for OptionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 在给定选项集中按显示文本匹配
///
/// 规则：
/// 1. 忽略值为空的占位选项
/// 2. 不区分大小写的子串匹配
/// 3. 多个命中时优先完全相等的那个
/// 4. 仍然不唯一则返回 `Ambiguous`，不做猜测
pub fn match_option<'a>(
    control: &ControlRef,
    options: &'a [SelectOption],
    desired: &str,
) -> Result<&'a SelectOption, FormError> {
    let needle = desired.trim().to_lowercase();
    let candidates: Vec<&SelectOption> = options
        .iter()
        .filter(|o| !o.value.trim().is_empty())
        .filter(|o| !needle.is_empty() && o.label.to_lowercase().contains(&needle))
        .collect();

    match candidates.as_slice() {
        [] => Err(FormError::NotFound {
            control: control.name.clone(),
            desired: desired.to_string(),
        }),
        [only] => Ok(only),
        many => {
            let exact: Vec<&SelectOption> = many
                .iter()
                .copied()
                .filter(|o| o.label.trim().to_lowercase() == needle)
                .collect();
            match exact.as_slice() {
                [only] => Ok(only),
                _ => Err(FormError::Ambiguous {
                    control: control.name.clone(),
                    desired: desired.to_string(),
                    candidates: many.iter().map(|o| o.label.clone()).collect(),
                }),
            }
        }
    }
}

/// 选择器解析服务
pub struct SelectorResolver {
    /// 单次读取控件的时限
    read_timeout: Duration,
}

impl SelectorResolver {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    async fn read(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
    ) -> Result<ControlState, FormError> {
        let action = format!("read({})", control.name);
        bounded(action, self.read_timeout, driver.read_control(control)).await
    }

    /// 读取控件当前选项集并解析
    ///
    /// `parent_value` 是解析时父控件的值，写进结果里用于级联有效性判断。
    pub async fn resolve(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
        desired: &str,
        parent_value: Option<&str>,
    ) -> Result<ResolvedSelection, FormError> {
        let state = self.read(driver, control).await?;
        if !state.present {
            return Err(FormError::NotFound {
                control: control.name.clone(),
                desired: desired.to_string(),
            });
        }

        let option = match_option(control, &state.options, desired)?;
        debug!(
            "解析 {} '{}' -> {} ({})",
            control, desired, option.value, option.label
        );

        Ok(ResolvedSelection {
            value: option.value.clone(),
            label: option.label.clone(),
            parent_value: parent_value.map(str::to_string),
        })
    }

    /// 读取控件当前选项集的指纹
    pub async fn fingerprint(
        &self,
        driver: &dyn FormDriver,
        control: &ControlRef,
    ) -> Result<OptionFingerprint, FormError> {
        let state = self.read(driver, control).await?;
        Ok(OptionFingerprint::of(&state.options))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> ControlRef {
        ControlRef::new("package", "select[name=package]")
    }

    fn options(labels: &[&str]) -> Vec<SelectOption> {
        let mut options = vec![SelectOption::new("", "-- 请选择 --")];
        options.extend(
            labels
                .iter()
                .enumerate()
                .map(|(i, l)| SelectOption::new((i + 1).to_string(), *l)),
        );
        options
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let opts = options(&["Bangkok-Chiangmai-01", "Bangkok-Phuket-02"]);
        let hit = match_option(&control(), &opts, "phuket").unwrap();
        assert_eq!(hit.label, "Bangkok-Phuket-02");
        assert_eq!(hit.value, "2");
    }

    #[test]
    fn exact_label_wins_over_substring() {
        let opts = options(&["GRP-101", "GRP-1010", "grp-101 (old)"]);
        let hit = match_option(&control(), &opts, "grp-101").unwrap();
        assert_eq!(hit.label, "GRP-101");
    }

    #[test]
    fn every_present_label_resolves_to_itself() {
        let labels = ["Bangkok-Chiangmai-01", "Bangkok-Phuket-02", "GRP-100", "GRP-101", "Krabi"];
        let opts = options(&labels);
        for label in labels {
            let hit = match_option(&control(), &opts, &label.to_uppercase()).unwrap();
            assert_eq!(hit.label.to_lowercase(), label.to_lowercase());
        }
    }

    #[test]
    fn missing_and_tied_labels_are_reported() {
        let opts = options(&["Bangkok-Chiangmai-01", "Bangkok-Phuket-02"]);
        assert!(matches!(
            match_option(&control(), &opts, "Krabi"),
            Err(FormError::NotFound { .. })
        ));

        match match_option(&control(), &opts, "Bangkok") {
            Err(FormError::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn placeholder_and_blank_requests_never_match() {
        let opts = options(&["GRP-100"]);
        assert!(match_option(&control(), &opts, "请选择").is_err());
        assert!(match_option(&control(), &opts, "  ").is_err());
    }

    #[test]
    fn fingerprint_tracks_option_content() {
        let a = options(&["GRP-100", "GRP-101"]);
        let b = options(&["GRP-100", "GRP-101"]);
        let c = options(&["GRP-200"]);
        assert_eq!(OptionFingerprint::of(&a), OptionFingerprint::of(&b));
        assert_ne!(OptionFingerprint::of(&a), OptionFingerprint::of(&c));
        assert_ne!(OptionFingerprint::of(&[]), OptionFingerprint::of(&c));
    }
}
