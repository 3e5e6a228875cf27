//! 测试用的脚本化页面
//!
//! `MockPage` 在内存里模拟一个表单页面：控件状态、级联刷新（父控件写入后子控件
//! 选项在若干次读取后才更新）、动态行、提交行为。所有操作都记入事件日志。

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use form_pilot::config::Timeouts;
use form_pilot::error::{AppError, AppResult};
use form_pilot::infrastructure::{FormDriver, SessionFactory, SubmitDispatch};
use form_pilot::models::{ControlRef, ControlState, FormSpec, RecordInput, SelectOption};

pub const SUCCESS_REGION: &str = ".alert-success";
pub const ERROR_REGION: &str = ".alert-danger";

pub const FORM_SPEC: &str = r##"
name = "tour-charge"
url = "https://forms.test/charges_group/create"
idempotency_fields = ["program", "tour_code", "amount"]
submit_selector = "#submit"

[[ready]]
when = "options_non_empty"
selector = "#package"

[extraction]
success_selector = ".alert-success"
error_selector = ".alert-danger"
identifier_pattern = 'C[0-9A-Z]{6}-\d{4}'

[[fields]]
name = "package"
selector = "#package"
kind = { type = "simple_select" }
value = { rule = "field", name = "program" }

[[fields]]
name = "period"
selector = "#period"
kind = { type = "cascading_select", parent = "package" }
value = { rule = "field", name = "tour_code" }

[[fields]]
name = "amount"
selector = "#amount"
kind = { type = "text" }
value = { rule = "field", name = "amount" }

[[fields]]
name = "remark"
selector = "#remark"
kind = { type = "text" }
value = { rule = "template", template = "Program : {package.label} / Code group : {tour_code}" }
"##;

pub fn form_spec() -> FormSpec {
    let spec: FormSpec = toml::from_str(FORM_SPEC).unwrap();
    spec.validate().unwrap();
    spec
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        poll_interval: Duration::from_millis(5),
        ready: Duration::from_millis(300),
        cascade_refresh: Duration::from_millis(150),
        write_confirm: Duration::from_millis(60),
        extraction: Duration::from_millis(150),
    }
}

pub fn record(index: usize, program: &str, tour_code: &str, amount: &str) -> RecordInput {
    let fields = [
        ("program", program),
        ("tour_code", tour_code),
        ("amount", amount),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    RecordInput::new(index, fields)
}

pub fn ctl(selector: &str) -> ControlRef {
    ControlRef::new(selector.trim_start_matches(|c| c == '#' || c == '.'), selector)
}

fn options(pairs: &[(&str, &str)]) -> Vec<SelectOption> {
    pairs
        .iter()
        .map(|(value, label)| SelectOption::new(*value, *label))
        .collect()
}

/// 提交按钮被点击后的页面行为
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// 出现成功提示
    Success(String),
    /// 出现错误提示
    Reject(String),
    /// 点击已下发，但连接在结果出现前中断
    LinkLost,
    /// 点击无法下发
    Fail,
    /// 点击下发了，页面没有任何提示
    Silent,
    /// 提交往返一直不返回
    Hang,
}

struct CascadeRule {
    parent: String,
    child: String,
    by_parent: HashMap<String, Vec<SelectOption>>,
    delay_reads: usize,
}

struct Pending {
    remaining: usize,
    options: Vec<SelectOption>,
}

struct PageState {
    controls: HashMap<String, ControlState>,
    cascades: Vec<CascadeRule>,
    pending: HashMap<String, Pending>,
    reveals: HashMap<String, String>,
    ignored: HashSet<String>,
    stalled: HashSet<String>,
    hang_navigation: bool,
    submit: SubmitBehavior,
    submits: usize,
    events: Vec<String>,
    closed: bool,
}

/// 脚本化页面，可克隆，克隆共享同一份状态
#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<PageState>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                controls: HashMap::new(),
                cascades: Vec::new(),
                pending: HashMap::new(),
                reveals: HashMap::new(),
                ignored: HashSet::new(),
                stalled: HashSet::new(),
                hang_navigation: false,
                submit: SubmitBehavior::Silent,
                submits: 0,
                events: Vec::new(),
                closed: false,
            })),
        }
    }

    /// 与 `FORM_SPEC` 对应的标准页面
    pub fn tour_charge_form(child_delay_reads: usize, submit: SubmitBehavior) -> Self {
        Self::new()
            .select(
                "#package",
                &[
                    ("", "-- select --"),
                    ("1", "Bangkok-Chiangmai-01"),
                    ("2", "Bangkok-Phuket-02"),
                ],
            )
            .select("#period", &[("", "-- select --")])
            .cascade(
                "#package",
                "#period",
                &[
                    ("1", &[("", "-- select --"), ("90", "GRP-090")]),
                    (
                        "2",
                        &[("", "-- select --"), ("100", "GRP-100"), ("101", "GRP-101")],
                    ),
                ],
                child_delay_reads,
            )
            .text_input("#amount")
            .text_input("#remark")
            .on_submit(submit)
    }

    fn with_state(&self, f: impl FnOnce(&mut PageState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn text_input(self, selector: &str) -> Self {
        self.with_state(|s| {
            s.controls.insert(
                selector.to_string(),
                ControlState {
                    present: true,
                    interactive: true,
                    value: Some(String::new()),
                    ..ControlState::default()
                },
            );
        });
        self
    }

    pub fn select(self, selector: &str, pairs: &[(&str, &str)]) -> Self {
        self.with_state(|s| {
            s.controls.insert(
                selector.to_string(),
                ControlState {
                    present: true,
                    interactive: true,
                    value: Some(String::new()),
                    text: None,
                    options: options(pairs),
                },
            );
        });
        self
    }

    /// 父控件写入后，子控件的选项在 `delay_reads` 次读取后才更新
    ///
    /// `usize::MAX` 表示永远不更新。
    pub fn cascade(
        self,
        parent: &str,
        child: &str,
        by_parent: &[(&str, &[(&str, &str)])],
        delay_reads: usize,
    ) -> Self {
        self.with_state(|s| {
            s.cascades.push(CascadeRule {
                parent: parent.to_string(),
                child: child.to_string(),
                by_parent: by_parent
                    .iter()
                    .map(|(value, pairs)| (value.to_string(), options(pairs)))
                    .collect(),
                delay_reads,
            });
        });
        self
    }

    /// 写入 `trigger` 后 `target` 才出现
    pub fn reveal(self, trigger: &str, target: &str) -> Self {
        self.with_state(|s| {
            s.reveals.insert(trigger.to_string(), target.to_string());
            if let Some(state) = s.controls.get_mut(target) {
                state.present = false;
                state.interactive = false;
            }
        });
        self
    }

    /// 写入被静默忽略的控件
    pub fn ignore_writes(self, selector: &str) -> Self {
        self.with_state(|s| {
            s.ignored.insert(selector.to_string());
        });
        self
    }

    /// 写入这个控件的调用永远不返回
    pub fn stall_writes(self, selector: &str) -> Self {
        self.with_state(|s| {
            s.stalled.insert(selector.to_string());
        });
        self
    }

    /// 导航永远不返回
    pub fn hang_navigation(self) -> Self {
        self.with_state(|s| s.hang_navigation = true);
        self
    }

    pub fn on_submit(self, behavior: SubmitBehavior) -> Self {
        self.with_state(|s| s.submit = behavior);
        self
    }

    /// 直接修改页面上某个区域的文本（模拟页面在提交后才加载出结果）
    pub fn show_text(&self, selector: &str, text: &str) {
        self.with_state(|s| {
            s.controls.insert(
                selector.to_string(),
                ControlState {
                    present: true,
                    interactive: true,
                    value: None,
                    text: Some(text.to_string()),
                    options: Vec::new(),
                },
            );
        });
    }

    pub fn driver(&self) -> Box<dyn FormDriver> {
        Box::new(MockDriver {
            state: self.state.clone(),
        })
    }

    pub fn value(&self, selector: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .controls
            .get(selector)
            .and_then(|s| s.value.clone())
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submits
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// 对某个控件的写入记录
    pub fn writes_to(&self, selector: &str) -> Vec<String> {
        let prefix = format!("apply {}=", selector);
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

struct MockDriver {
    state: Arc<Mutex<PageState>>,
}

impl PageState {
    fn apply(&mut self, selector: &str, value: &str) -> AppResult<()> {
        let Some(control) = self.controls.get_mut(selector) else {
            return Err(AppError::Other(format!("控件不存在: {}", selector)));
        };
        if !control.present {
            return Err(AppError::Other(format!("控件不可见: {}", selector)));
        }

        // 下拉框只接受选项集中存在的值
        let accepted = if control.options.is_empty() {
            value.to_string()
        } else if control.options.iter().any(|o| o.value == value) {
            value.to_string()
        } else {
            String::new()
        };
        control.value = Some(accepted.clone());

        for rule in self.cascades.iter().filter(|r| r.parent == selector) {
            let options = rule.by_parent.get(&accepted).cloned().unwrap_or_default();
            if rule.delay_reads == 0 {
                if let Some(child) = self.controls.get_mut(&rule.child) {
                    child.options = options;
                    child.value = Some(String::new());
                }
            } else {
                self.pending.insert(
                    rule.child.clone(),
                    Pending {
                        remaining: rule.delay_reads,
                        options,
                    },
                );
            }
        }

        if let Some(target) = self.reveals.get(selector).cloned() {
            if let Some(state) = self.controls.get_mut(&target) {
                state.present = true;
                state.interactive = true;
            }
        }
        Ok(())
    }

    fn read(&mut self, selector: &str) -> ControlState {
        let ready = match self.pending.get_mut(selector) {
            Some(pending) if pending.remaining == 0 => true,
            Some(pending) => {
                pending.remaining -= 1;
                false
            }
            None => false,
        };
        if ready {
            if let Some(pending) = self.pending.remove(selector) {
                if let Some(child) = self.controls.get_mut(selector) {
                    child.options = pending.options;
                    child.value = Some(String::new());
                }
            }
        }
        self.controls
            .get(selector)
            .cloned()
            .unwrap_or_else(ControlState::absent)
    }
}

#[async_trait]
impl FormDriver for MockDriver {
    async fn navigate(&self, url: &str) -> AppResult<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.events.push(format!("navigate {}", url));
            state.hang_navigation
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn read_control(&self, control: &ControlRef) -> AppResult<ControlState> {
        Ok(self.state.lock().unwrap().read(&control.selector))
    }

    async fn apply_value(&self, control: &ControlRef, value: &str) -> AppResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .events
                .push(format!("apply {}={}", control.selector, value));
            if state.ignored.contains(&control.selector) {
                return Ok(());
            }
            if !state.stalled.contains(&control.selector) {
                return state.apply(&control.selector, value);
            }
        }
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn execute_submit(&self, _control: &ControlRef) -> AppResult<SubmitDispatch> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.submits += 1;
            state.events.push("submit".to_string());
            state.submit.clone()
        };

        let show = |selector: &str, text: &str| {
            let mut state = self.state.lock().unwrap();
            state.controls.insert(
                selector.to_string(),
                ControlState {
                    present: true,
                    interactive: true,
                    value: None,
                    text: Some(text.to_string()),
                    options: Vec::new(),
                },
            );
        };

        match behavior {
            SubmitBehavior::Success(banner) => {
                show(SUCCESS_REGION, &banner);
                Ok(SubmitDispatch::Sent)
            }
            SubmitBehavior::Reject(reason) => {
                show(ERROR_REGION, &reason);
                Ok(SubmitDispatch::Sent)
            }
            SubmitBehavior::LinkLost => Ok(SubmitDispatch::LinkLost {
                detail: "connection reset".to_string(),
            }),
            SubmitBehavior::Fail => Err(AppError::Other("提交按钮不可点击".to_string())),
            SubmitBehavior::Silent => Ok(SubmitDispatch::Sent),
            SubmitBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(SubmitDispatch::Sent)
            }
        }
    }

    async fn close(&self) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.events.push("close".to_string());
        Ok(())
    }
}

/// 按顺序发放预先准备好的页面
pub struct MockFactory {
    pages: Mutex<VecDeque<MockPage>>,
    opened: AtomicUsize,
}

impl MockFactory {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self) -> AppResult<Box<dyn FormDriver>> {
        let page = self.pages.lock().unwrap().pop_front();
        match page {
            Some(page) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(page.driver())
            }
            None => Err(AppError::Other("没有可用的页面".to_string())),
        }
    }
}
