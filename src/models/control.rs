//! 控件相关的数据结构
//!
//! 引擎只通过 `ControlRef` 指代页面上的控件，选择器字符串由驱动自己解释。

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// 控件引用：逻辑名 + 后端选择器
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlRef {
    pub name: String,
    pub selector: String,
}

impl ControlRef {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
        }
    }
}

impl Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 下拉框中的一个选项
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// 控件当前渲染状态的快照
///
/// 由驱动的 `read_control` 返回。控件不存在时 `present == false`，其余字段为空。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub present: bool,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

impl ControlState {
    pub fn absent() -> Self {
        Self::default()
    }

    /// 去掉首尾空白后的非空文本
    pub fn visible_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// 用于日志和诊断的简短描述
    pub fn summary(&self) -> String {
        if !self.present {
            return "<不存在>".to_string();
        }
        let mut parts = vec![format!("value={:?}", self.value)];
        if let Some(text) = self.visible_text() {
            parts.push(format!("text={:?}", crate::utils::logging::truncate_text(text, 60)));
        }
        if !self.options.is_empty() {
            parts.push(format!("options={}", self.options.len()));
        }
        if !self.interactive {
            parts.push("不可交互".to_string());
        }
        parts.join(", ")
    }
}

/// 选择器解析结果
///
/// 只在父控件的值与解析时相同的情况下有效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSelection {
    /// 控件底层的机器值
    pub value: String,
    /// 匹配到的显示文本
    pub label: String,
    /// 解析时父控件的值（非级联控件为 None）
    pub parent_value: Option<String>,
}

impl ResolvedSelection {
    /// 在父控件当前值下该解析结果是否仍然有效
    pub fn is_valid_under(&self, parent_value: Option<&str>) -> bool {
        self.parent_value.as_deref() == parent_value
    }
}
