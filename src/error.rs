use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 表单自动化错误
    #[error("表单错误: {0}")]
    Form(#[from] FormError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 启动浏览器失败
    #[error("启动浏览器失败: {reason}")]
    LaunchFailed { reason: String },
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// JSON 解析失败
    #[error("JSON解析失败: {source}")]
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 表单描述不合法
    #[error("表单描述不合法: {reason}")]
    InvalidFormSpec { reason: String },
    /// 标识符正则无法编译
    #[error("标识符正则无法编译 ({pattern}): {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// 等待超时的诊断信息
///
/// 由就绪监视器在超时时给出，说明哪个条件没有满足以及最后一次观察到的值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutDiagnostic {
    /// 未满足的条件描述
    pub predicate: String,
    /// 最后一次观察到的状态
    pub last_observed: String,
    /// 实际等待时长
    pub elapsed: Duration,
}

impl fmt::Display for TimeoutDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "条件 [{}] 在 {}ms 内未满足, 最后观察值: {}",
            self.predicate,
            self.elapsed.as_millis(),
            self.last_observed
        )
    }
}

/// 表单自动化错误
///
/// 引擎内部各组件的失败分类。提交结果（成功 / 被拒绝 / 不确定）不在这里，
/// 见 [`crate::models::SubmissionOutcome`]。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormError {
    /// 期望的选项在当前选项集中不存在
    #[error("控件 {control} 中没有匹配 '{desired}' 的选项")]
    NotFound { control: String, desired: String },
    /// 多个选项同样匹配
    #[error("控件 {control} 中 '{desired}' 匹配到多个选项: {candidates:?}")]
    Ambiguous {
        control: String,
        desired: String,
        candidates: Vec<String>,
    },
    /// 就绪条件在超时内没有成立
    #[error("等待超时: {0}")]
    TimedOut(TimeoutDiagnostic),
    /// 写入后回读不一致
    #[error("控件 {control} 写入未生效: 期望 '{expected}', 实际 {observed:?}")]
    WriteFailed {
        control: String,
        expected: String,
        observed: Option<String>,
    },
    /// 字段取值无法确定（缺少记录字段、模板占位符未知等）
    #[error("字段 {field} 取值失败: {reason}")]
    InvalidValue { field: String, reason: String },
    /// 自动化后端报错
    #[error("驱动错误: {0}")]
    Driver(String),
}

impl FormError {
    /// 该错误是否可以通过换一个新会话整条记录重试来恢复
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FormError::InvalidValue { .. })
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

// 驱动层的任何失败对引擎来说都是一次可重试的后端错误
impl From<AppError> for FormError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Form(form) => form,
            other => FormError::Driver(other.to_string()),
        }
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建表单描述不合法错误
    pub fn invalid_form_spec(reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidFormSpec {
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_values_are_unrecoverable() {
        assert!(FormError::Driver("reset".into()).is_recoverable());
        assert!(FormError::NotFound {
            control: "package".into(),
            desired: "Krabi".into()
        }
        .is_recoverable());
        assert!(!FormError::InvalidValue {
            field: "remark".into(),
            reason: "未知占位符".into()
        }
        .is_recoverable());
    }

    #[test]
    fn driver_failures_flatten_into_form_errors() {
        let err: FormError = AppError::Other("connection reset".into()).into();
        assert_eq!(err, FormError::Driver("错误: connection reset".into()));

        let inner = FormError::Driver("x".into());
        let err: FormError = AppError::Form(inner.clone()).into();
        assert_eq!(err, inner);
    }
}
