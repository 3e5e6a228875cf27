//! 表单描述（FormSpec）
//!
//! 声明式地描述一张表单：目标地址、字段顺序、级联关系、就绪条件、
//! 提交按钮以及结果提取规则。通常从 TOML 文件加载，见 `models::loaders`。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, ConfigError, FormError};
use crate::models::control::ControlRef;
use crate::models::record::RecordInput;

/// 控件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlKind {
    Text,
    Date,
    SimpleSelect,
    /// 选项集依赖于 `parent` 字段当前值的下拉框
    CascadingSelect { parent: String },
    /// 需要先触发某个操作（如"添加一行"）才会出现的控件
    DynamicRow {
        reveal: String,
        #[serde(default = "default_reveal_value")]
        reveal_value: String,
    },
}

fn default_reveal_value() -> String {
    "on".to_string()
}

impl ControlKind {
    /// 是否按显示文本解析为机器值
    pub fn is_select(&self) -> bool {
        matches!(
            self,
            ControlKind::SimpleSelect | ControlKind::CascadingSelect { .. }
        )
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            ControlKind::CascadingSelect { parent } => Some(parent),
            _ => None,
        }
    }
}

/// 字段取值规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValueRule {
    /// 固定值
    Literal { value: String },
    /// 取记录中的某个字段
    Field { name: String },
    /// 今天起第 N 天，按 chrono 格式输出
    DaysFromToday {
        days: i64,
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// 文本模板，`{name}` 取记录字段，`{name.label}` 取已解析下拉框的显示文本
    Template { template: String },
}

fn default_date_format() -> String {
    "%d/%m/%Y".to_string()
}

/// 取值时可用的上下文
#[derive(Debug, Default, Clone)]
pub struct ValueContext {
    /// 已写入字段的最终值
    pub values: HashMap<String, String>,
    /// 已解析下拉框的显示文本
    pub labels: HashMap<String, String>,
}

impl ValueRule {
    /// 按规则计算字段值
    pub fn render(
        &self,
        field: &str,
        record: &RecordInput,
        ctx: &ValueContext,
    ) -> Result<String, FormError> {
        match self {
            ValueRule::Literal { value } => Ok(value.clone()),
            ValueRule::Field { name } => {
                record
                    .get(name)
                    .map(str::to_string)
                    .ok_or_else(|| FormError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("记录中缺少字段 {}", name),
                    })
            }
            ValueRule::DaysFromToday { days, format } => {
                let date = chrono::Local::now().date_naive() + chrono::Duration::days(*days);
                Ok(date.format(format).to_string())
            }
            ValueRule::Template { template } => render_template(field, template, record, ctx),
        }
    }
}

// 占位符只允许字母数字、下划线和点
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("placeholder regex is valid")
});

fn render_template(
    field: &str,
    template: &str,
    record: &RecordInput,
    ctx: &ValueContext,
) -> Result<String, FormError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for cap in PLACEHOLDER_REGEX.captures_iter(template) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = match name.strip_suffix(".label") {
            Some(base) => ctx.labels.get(base).map(String::as_str),
            None => record
                .get(name)
                .or_else(|| ctx.values.get(name).map(String::as_str)),
        };
        let value = value.ok_or_else(|| FormError::InvalidValue {
            field: field.to_string(),
            reason: format!("模板占位符 {{{}}} 没有对应的值", name),
        })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(value);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// 单个字段的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    pub kind: ControlKind,
    pub value: ValueRule,
}

impl FieldSpec {
    pub fn control(&self) -> ControlRef {
        ControlRef::new(&self.name, &self.selector)
    }

    /// 动态控件的触发器
    pub fn reveal_control(&self) -> Option<(ControlRef, &str)> {
        match &self.kind {
            ControlKind::DynamicRow {
                reveal,
                reveal_value,
            } => Some((
                ControlRef::new(format!("{}#reveal", self.name), reveal),
                reveal_value.as_str(),
            )),
            _ => None,
        }
    }
}

/// 可配置的页面就绪条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum ReadySpec {
    Present { selector: String },
    ValueEquals { selector: String, value: String },
    OptionsNonEmpty { selector: String },
    Stable { selector: String },
}

/// 提交结果提取规则
///
/// "成功"的判定因部署而异，所以这里必须显式配置，没有内置默认值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    /// 成功提示区域
    pub success_selector: String,
    /// 错误 / 校验提示区域
    pub error_selector: String,
    /// 标识符所在区域，缺省为成功提示区域
    #[serde(default)]
    pub identifier_selector: Option<String>,
    /// 标识符正则
    pub identifier_pattern: String,
    /// 正则版本号，写进日志便于追溯
    #[serde(default = "default_pattern_version")]
    pub pattern_version: u32,
}

fn default_pattern_version() -> u32 {
    1
}

impl ExtractionSpec {
    pub fn success_region(&self) -> ControlRef {
        ControlRef::new("success", &self.success_selector)
    }

    pub fn error_region(&self) -> ControlRef {
        ControlRef::new("error", &self.error_selector)
    }

    pub fn identifier_region(&self) -> ControlRef {
        match &self.identifier_selector {
            Some(selector) => ControlRef::new("identifier", selector),
            None => self.success_region(),
        }
    }

    /// 编译标识符正则
    pub fn compile_pattern(&self) -> AppResult<Regex> {
        Regex::new(&self.identifier_pattern).map_err(|source| {
            AppError::Config(ConfigError::InvalidPattern {
                pattern: self.identifier_pattern.clone(),
                source,
            })
        })
    }
}

/// 完整的表单描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSpec {
    pub name: String,
    pub url: String,
    /// 参与幂等键计算的记录字段，为空时使用全部字段
    #[serde(default)]
    pub idempotency_fields: Vec<String>,
    #[serde(default)]
    pub ready: Vec<ReadySpec>,
    pub submit_selector: String,
    pub extraction: ExtractionSpec,
    pub fields: Vec<FieldSpec>,
}

impl FormSpec {
    pub fn submit_control(&self) -> ControlRef {
        ControlRef::new("submit", &self.submit_selector)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 校验字段名唯一、级联父字段存在且先声明、无分叉、正则可编译
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        let mut children: BTreeMap<&str, &str> = BTreeMap::new();

        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(AppError::invalid_form_spec(format!(
                    "字段名重复: {}",
                    field.name
                )));
            }
            if let Some(parent) = field.kind.parent() {
                // 父字段必须已经出现过，这同时排除了环
                if !seen.contains(parent) || parent == field.name {
                    return Err(AppError::invalid_form_spec(format!(
                        "字段 {} 的级联父字段 {} 不存在或未在其之前声明",
                        field.name, parent
                    )));
                }
                if let Some(existing) = children.insert(parent, field.name.as_str()) {
                    return Err(AppError::invalid_form_spec(format!(
                        "字段 {} 有多个级联子字段: {} 和 {}",
                        parent, existing, field.name
                    )));
                }
            }
        }

        self.extraction.compile_pattern()?;
        Ok(())
    }

    /// 级联链：从根字段开始依次到最深的子字段，按根字段声明顺序排列
    pub fn cascade_chains(&self) -> Vec<Vec<&FieldSpec>> {
        let child_of: HashMap<&str, &FieldSpec> = self
            .fields
            .iter()
            .filter_map(|f| f.kind.parent().map(|p| (p, f)))
            .collect();

        self.fields
            .iter()
            .filter(|f| f.kind.parent().is_none() && child_of.contains_key(f.name.as_str()))
            .map(|root| {
                let mut chain = vec![root];
                let mut current = root;
                while let Some(child) = child_of.get(current.name.as_str()) {
                    chain.push(child);
                    current = child;
                }
                chain
            })
            .collect()
    }

    /// 不属于任何级联链的字段，按声明顺序
    pub fn simple_fields(&self) -> Vec<&FieldSpec> {
        let in_chain: HashSet<&str> = self
            .cascade_chains()
            .into_iter()
            .flatten()
            .map(|f| f.name.as_str())
            .collect();
        self.fields
            .iter()
            .filter(|f| !in_chain.contains(f.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r##"
name = "tour-charge"
url = "https://example.test/charges_group/create"
idempotency_fields = ["tour_code", "amount"]
submit_selector = "button[type=submit]"

[[ready]]
when = "options_non_empty"
selector = "select[name=package]"

[extraction]
success_selector = ".alert-success"
error_selector = ".alert-danger"
identifier_pattern = 'C\d{6}-\d{6}'

[[fields]]
name = "date_end"
selector = "input[name=end]"
kind = { type = "date" }
value = { rule = "literal", value = "31/12/2026" }

[[fields]]
name = "package"
selector = "select[name=package]"
kind = { type = "cascading_select", parent = "date_end" }
value = { rule = "field", name = "program" }

[[fields]]
name = "period"
selector = "select[name=period]"
kind = { type = "cascading_select", parent = "package" }
value = { rule = "field", name = "tour_code" }

[[fields]]
name = "remark"
selector = "textarea[name=remark]"
kind = { type = "text" }
value = { rule = "template", template = "Program : {package.label}\nCode group : {tour_code}" }

[[fields]]
name = "company"
selector = "select[name=company]"
kind = { type = "dynamic_row", reveal = "#company-toggle" }
value = { rule = "literal", value = "39" }
"##;

    fn spec() -> FormSpec {
        toml::from_str(SPEC).unwrap()
    }

    #[test]
    fn parses_and_validates_a_three_level_chain() {
        let spec = spec();
        spec.validate().unwrap();

        let chains = spec.cascade_chains();
        assert_eq!(chains.len(), 1);
        let names: Vec<&str> = chains[0].iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["date_end", "package", "period"]);

        let simple: Vec<&str> = spec.simple_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(simple, ["remark", "company"]);

        let (reveal, value) = spec.field("company").unwrap().reveal_control().unwrap();
        assert_eq!(reveal.selector, "#company-toggle");
        assert_eq!(value, "on");
    }

    #[test]
    fn rejects_child_declared_before_parent() {
        let mut spec = spec();
        spec.fields.swap(1, 2);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_forked_cascade() {
        let mut spec = spec();
        spec.fields.push(FieldSpec {
            name: "period2".into(),
            selector: "select[name=period2]".into(),
            kind: ControlKind::CascadingSelect {
                parent: "package".into(),
            },
            value: ValueRule::Literal { value: "x".into() },
        });
        let err = spec.validate().unwrap_err().to_string();
        assert!(err.contains("多个级联子字段"), "{}", err);
    }

    #[test]
    fn rejects_bad_identifier_pattern() {
        let mut spec = spec();
        spec.extraction.identifier_pattern = "C(\\d+".into();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn template_uses_record_fields_and_resolved_labels() {
        let record = RecordInput::new(
            1,
            [("tour_code".to_string(), "GRP-101".to_string())].into(),
        );
        let mut ctx = ValueContext::default();
        ctx.labels
            .insert("package".into(), "Bangkok-Phuket-02".into());

        let rule = ValueRule::Template {
            template: "Program : {package.label}\nCode group : {tour_code}".into(),
        };
        let text = rule.render("remark", &record, &ctx).unwrap();
        assert_eq!(text, "Program : Bangkok-Phuket-02\nCode group : GRP-101");

        let missing = ValueRule::Template {
            template: "{nope}".into(),
        };
        assert!(matches!(
            missing.render("remark", &record, &ctx),
            Err(FormError::InvalidValue { .. })
        ));
    }

    #[test]
    fn days_from_today_uses_format() {
        let record = RecordInput::new(1, BTreeMap::new());
        let rule = ValueRule::DaysFromToday {
            days: 7,
            format: "%Y-%m-%d".into(),
        };
        let expected = (chrono::Local::now().date_naive() + chrono::Duration::days(7))
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(
            rule.render("payment_date", &record, &ValueContext::default())
                .unwrap(),
            expected
        );
    }
}
