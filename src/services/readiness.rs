//! 就绪监视服务 - 业务能力层
//!
//! 页面的加载事件不可靠，所以"能不能操作"由显式的条件决定，
//! 按固定间隔反复检查，直到成立或超时。只观察，不修改页面。

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::error::{FormError, TimeoutDiagnostic};
use crate::infrastructure::FormDriver;
use crate::models::{ControlRef, ControlState, ReadySpec};
use crate::services::selector_resolver::OptionFingerprint;

/// 就绪条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// 控件存在
    Present(ControlRef),
    /// 控件的值等于给定值（去掉首尾空白后比较）
    ValueEquals(ControlRef, String),
    /// 控件有非空文本
    TextPresent(ControlRef),
    /// 下拉框至少有一个非占位选项
    OptionsNonEmpty(ControlRef),
    /// 下拉框选项集指纹与基线不同
    OptionsChanged {
        control: ControlRef,
        baseline: OptionFingerprint,
    },
    /// 控件状态在连续两次检查之间没有变化
    Stable(ControlRef),
    /// 全部成立
    All(Vec<Predicate>),
    /// 任意一个成立
    Any(Vec<Predicate>),
}

impl Predicate {
    /// 条件涉及的全部控件（按选择器去重前）
    fn controls<'a>(&'a self, out: &mut Vec<&'a ControlRef>) {
        match self {
            Predicate::Present(c)
            | Predicate::ValueEquals(c, _)
            | Predicate::TextPresent(c)
            | Predicate::OptionsNonEmpty(c)
            | Predicate::OptionsChanged { control: c, .. }
            | Predicate::Stable(c) => out.push(c),
            Predicate::All(children) | Predicate::Any(children) => {
                for child in children {
                    child.controls(out);
                }
            }
        }
    }

    /// 在一次观察快照上求值
    fn check(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> Check {
        match self {
            Predicate::All(children) => {
                for child in children {
                    let check = child.check(snapshot, previous);
                    if !check.holds {
                        return check;
                    }
                }
                Check::holds()
            }
            Predicate::Any(children) => {
                let mut observed = Vec::new();
                for child in children {
                    let check = child.check(snapshot, previous);
                    if check.holds {
                        return check;
                    }
                    observed.push(check.observed);
                }
                Check::fails(self, observed.join(" | "))
            }
            leaf => {
                let Some(control) = leaf.single_control() else {
                    return Check::holds();
                };
                match snapshot.get(&control.selector) {
                    Some(Ok(state)) => {
                        let before = previous
                            .and_then(|p| p.get(&control.selector))
                            .and_then(|r| r.as_ref().ok());
                        if leaf.holds_for(state, before) {
                            Check::holds()
                        } else {
                            Check::fails(leaf, format!("{}: {}", control, state.summary()))
                        }
                    }
                    Some(Err(e)) => Check::fails(leaf, format!("{}: 读取失败 {}", control, e)),
                    None => Check::fails(leaf, format!("{}: 未观察", control)),
                }
            }
        }
    }

    fn single_control(&self) -> Option<&ControlRef> {
        match self {
            Predicate::Present(c)
            | Predicate::ValueEquals(c, _)
            | Predicate::TextPresent(c)
            | Predicate::OptionsNonEmpty(c)
            | Predicate::OptionsChanged { control: c, .. }
            | Predicate::Stable(c) => Some(c),
            Predicate::All(_) | Predicate::Any(_) => None,
        }
    }

    fn holds_for(&self, state: &ControlState, before: Option<&ControlState>) -> bool {
        if !state.present {
            return false;
        }
        match self {
            Predicate::Present(_) => true,
            Predicate::ValueEquals(_, expected) => {
                state.value.as_deref().map(str::trim) == Some(expected.trim())
            }
            Predicate::TextPresent(_) => state.visible_text().is_some(),
            Predicate::OptionsNonEmpty(_) => {
                state.options.iter().any(|o| !o.value.trim().is_empty())
            }
            Predicate::OptionsChanged { baseline, .. } => {
                OptionFingerprint::of(&state.options) != *baseline
            }
            Predicate::Stable(_) => before == Some(state),
            Predicate::All(_) | Predicate::Any(_) => false,
        }
    }

    /// 由表单描述中的就绪配置构造
    pub fn from_spec(spec: &ReadySpec) -> Self {
        let control = |selector: &str| ControlRef::new(selector, selector);
        match spec {
            ReadySpec::Present { selector } => Predicate::Present(control(selector)),
            ReadySpec::ValueEquals { selector, value } => {
                Predicate::ValueEquals(control(selector), value.clone())
            }
            ReadySpec::OptionsNonEmpty { selector } => {
                Predicate::OptionsNonEmpty(control(selector))
            }
            ReadySpec::Stable { selector } => Predicate::Stable(control(selector)),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Present(c) => write!(f, "present({})", c),
            Predicate::ValueEquals(c, v) => write!(f, "value({}) == {:?}", c, v),
            Predicate::TextPresent(c) => write!(f, "text({})", c),
            Predicate::OptionsNonEmpty(c) => write!(f, "options({}) non-empty", c),
            Predicate::OptionsChanged { control, baseline } => {
                write!(f, "options({}) != {}", control, baseline)
            }
            Predicate::Stable(c) => write!(f, "stable({})", c),
            Predicate::All(children) => write_list(f, "all", children),
            Predicate::Any(children) => write_list(f, "any", children),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, children: &[Predicate]) -> fmt::Result {
    let inner: Vec<String> = children.iter().map(|c| c.to_string()).collect();
    write!(f, "{}({})", name, inner.join(", "))
}

type Snapshot = HashMap<String, Result<ControlState, String>>;

struct Check {
    holds: bool,
    predicate: String,
    observed: String,
}

impl Check {
    fn holds() -> Self {
        Self {
            holds: true,
            predicate: String::new(),
            observed: String::new(),
        }
    }

    fn fails(predicate: &Predicate, observed: String) -> Self {
        Self {
            holds: false,
            predicate: predicate.to_string(),
            observed,
        }
    }
}

/// 等待结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { elapsed: Duration },
    TimedOut(TimeoutDiagnostic),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn into_result(self) -> Result<(), FormError> {
        match self {
            Readiness::Ready { .. } => Ok(()),
            Readiness::TimedOut(diagnostic) => Err(FormError::TimedOut(diagnostic)),
        }
    }
}

/// 就绪监视服务
#[derive(Debug, Clone)]
pub struct ReadinessMonitor {
    poll_interval: Duration,
}

impl ReadinessMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 等待条件成立
    ///
    /// 至少检查一次；之后每隔 `poll_interval` 检查一次，直到成立或超过 `timeout`。
    /// 返回 `Ready` 时条件在最后一次检查时一定成立。
    pub async fn await_ready(
        &self,
        driver: &dyn FormDriver,
        predicate: &Predicate,
        timeout_after: Duration,
    ) -> Readiness {
        let start = Instant::now();
        let mut controls = Vec::new();
        predicate.controls(&mut controls);

        let mut previous: Option<Snapshot> = None;
        let mut polls = 0usize;

        loop {
            let budget = timeout_after
                .saturating_sub(start.elapsed())
                .max(self.poll_interval);
            let snapshot = self.observe(driver, &controls, budget).await;
            polls += 1;

            let check = predicate.check(&snapshot, previous.as_ref());
            let elapsed = start.elapsed();
            if check.holds {
                debug!("条件 [{}] 成立 (检查 {} 次, {}ms)", predicate, polls, elapsed.as_millis());
                return Readiness::Ready { elapsed };
            }

            if elapsed >= timeout_after {
                debug!("条件 [{}] 超时 (检查 {} 次)", predicate, polls);
                return Readiness::TimedOut(TimeoutDiagnostic {
                    predicate: check.predicate,
                    last_observed: check.observed,
                    elapsed,
                });
            }

            let remaining = timeout_after - elapsed;
            sleep(self.poll_interval.min(remaining)).await;
            previous = Some(snapshot);
        }
    }

    /// 读取一次全部相关控件
    async fn observe(
        &self,
        driver: &dyn FormDriver,
        controls: &[&ControlRef],
        budget: Duration,
    ) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for control in controls {
            if snapshot.contains_key(&control.selector) {
                continue;
            }
            let state = match timeout(budget, driver.read_control(control)).await {
                Ok(Ok(state)) => Ok(state),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("读取超过 {}ms 未返回", budget.as_millis())),
            };
            snapshot.insert(control.selector.clone(), state);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectOption;

    fn ctl(name: &str) -> ControlRef {
        ControlRef::new(name, format!("#{}", name))
    }

    fn present(value: &str) -> ControlState {
        ControlState {
            present: true,
            interactive: true,
            value: Some(value.to_string()),
            ..ControlState::default()
        }
    }

    fn snapshot(entries: Vec<(&str, ControlState)>) -> Snapshot {
        entries
            .into_iter()
            .map(|(name, state)| (format!("#{}", name), Ok(state)))
            .collect()
    }

    #[test]
    fn composite_all_reports_first_failing_child() {
        let predicate = Predicate::All(vec![
            Predicate::Present(ctl("a")),
            Predicate::ValueEquals(ctl("b"), "2".into()),
        ]);
        let snap = snapshot(vec![("a", present("x")), ("b", present("1"))]);
        let check = predicate.check(&snap, None);
        assert!(!check.holds);
        assert!(check.predicate.starts_with("value(b)"));
        assert!(check.observed.contains("\"1\""));
    }

    #[test]
    fn any_holds_when_one_child_holds() {
        let predicate = Predicate::Any(vec![
            Predicate::TextPresent(ctl("ok")),
            Predicate::TextPresent(ctl("err")),
        ]);
        let mut err = present("");
        err.text = Some("金额不能为空".into());
        let snap = snapshot(vec![("ok", ControlState::absent()), ("err", err)]);
        assert!(predicate.check(&snap, None).holds);
    }

    #[test]
    fn stable_needs_two_identical_observations() {
        let predicate = Predicate::Stable(ctl("a"));
        let first = snapshot(vec![("a", present("1"))]);
        let second = snapshot(vec![("a", present("1"))]);
        let changed = snapshot(vec![("a", present("2"))]);

        assert!(!predicate.check(&first, None).holds);
        assert!(predicate.check(&second, Some(&first)).holds);
        assert!(!predicate.check(&changed, Some(&second)).holds);
    }

    #[test]
    fn options_changed_compares_against_baseline() {
        let mut state = present("");
        state.options = vec![SelectOption::new("100", "GRP-100")];
        let baseline = OptionFingerprint::of(&state.options);
        let predicate = Predicate::OptionsChanged {
            control: ctl("period"),
            baseline,
        };
        let snap = snapshot(vec![("period", state.clone())]);
        assert!(!predicate.check(&snap, None).holds);

        state.options.push(SelectOption::new("101", "GRP-101"));
        let snap = snapshot(vec![("period", state)]);
        assert!(predicate.check(&snap, None).holds);
    }

    #[test]
    fn read_failures_count_as_not_ready() {
        let predicate = Predicate::Present(ctl("a"));
        let mut snap = Snapshot::new();
        snap.insert("#a".into(), Err("context destroyed".into()));
        let check = predicate.check(&snap, None);
        assert!(!check.holds);
        assert!(check.observed.contains("context destroyed"));
    }
}
