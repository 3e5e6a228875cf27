use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时处理的记录数量（每条记录独占一个页面）
    pub max_concurrent_records: usize,
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否自行启动无头浏览器，否则连接调试端口上已运行的浏览器
    pub launch_headless: bool,
    /// 无头模式下使用的浏览器可执行文件
    pub chrome_executable: Option<String>,
    /// 表单描述文件
    pub form_spec_file: String,
    /// 记录文件
    pub records_file: String,
    /// 从第几条记录开始（跳过前面的）
    pub records_start: usize,
    /// 最多处理多少条记录
    pub records_limit: Option<usize>,
    /// 结果文件（每条记录一行 JSON）
    pub results_file: String,
    /// 待人工核对的记录文件
    pub review_file: String,
    /// 幂等账本文件，不设置则只在进程内有效
    pub ledger_file: Option<String>,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 每条记录最多尝试次数
    pub max_attempts: u32,
    /// 两次尝试之间的等待
    pub retry_delay_ms: u64,
    /// 就绪条件的检查间隔
    pub poll_interval_ms: u64,
    /// 页面就绪超时
    pub ready_timeout_ms: u64,
    /// 级联子控件刷新超时
    pub cascade_timeout_ms: u64,
    /// 写入回读确认超时
    pub write_confirm_timeout_ms: u64,
    /// 提交后等待结果提示的超时
    pub extraction_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_records: 1,
            browser_debug_port: 9222,
            launch_headless: false,
            chrome_executable: None,
            form_spec_file: "form_spec.toml".to_string(),
            records_file: "records.toml".to_string(),
            records_start: 0,
            records_limit: None,
            results_file: "results.jsonl".to_string(),
            review_file: "review.jsonl".to_string(),
            ledger_file: None,
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            max_attempts: 3,
            retry_delay_ms: 2000,
            poll_interval_ms: 200,
            ready_timeout_ms: 30_000,
            cascade_timeout_ms: 10_000,
            write_confirm_timeout_ms: 2_000,
            extraction_timeout_ms: 15_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_records: env_parse("MAX_CONCURRENT_RECORDS")
                .unwrap_or(default.max_concurrent_records)
                .max(1),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").unwrap_or(default.browser_debug_port),
            launch_headless: env_parse("LAUNCH_HEADLESS").unwrap_or(default.launch_headless),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            form_spec_file: std::env::var("FORM_SPEC_FILE").unwrap_or(default.form_spec_file),
            records_file: std::env::var("RECORDS_FILE").unwrap_or(default.records_file),
            records_start: env_parse("RECORDS_START").unwrap_or(default.records_start),
            records_limit: env_parse("RECORDS_LIMIT").or(default.records_limit),
            results_file: std::env::var("RESULTS_FILE").unwrap_or(default.results_file),
            review_file: std::env::var("REVIEW_FILE").unwrap_or(default.review_file),
            ledger_file: std::env::var("LEDGER_FILE").ok().or(default.ledger_file),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            max_attempts: env_parse("MAX_ATTEMPTS").unwrap_or(default.max_attempts).max(1),
            retry_delay_ms: env_parse("RETRY_DELAY_MS").unwrap_or(default.retry_delay_ms),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS").unwrap_or(default.poll_interval_ms),
            ready_timeout_ms: env_parse("READY_TIMEOUT_MS").unwrap_or(default.ready_timeout_ms),
            cascade_timeout_ms: env_parse("CASCADE_TIMEOUT_MS").unwrap_or(default.cascade_timeout_ms),
            write_confirm_timeout_ms: env_parse("WRITE_CONFIRM_TIMEOUT_MS")
                .unwrap_or(default.write_confirm_timeout_ms),
            extraction_timeout_ms: env_parse("EXTRACTION_TIMEOUT_MS")
                .unwrap_or(default.extraction_timeout_ms),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ready: Duration::from_millis(self.ready_timeout_ms),
            cascade_refresh: Duration::from_millis(self.cascade_timeout_ms),
            write_confirm: Duration::from_millis(self.write_confirm_timeout_ms),
            extraction: Duration::from_millis(self.extraction_timeout_ms),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 各个等待点的超时
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub poll_interval: Duration,
    /// 页面就绪、控件出现
    pub ready: Duration,
    pub cascade_refresh: Duration,
    pub write_confirm: Duration,
    /// 提交往返与结果提示
    pub extraction: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Config::default().timeouts()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            let err = ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value: raw,
                expected_type: std::any::type_name::<T>().to_string(),
            };
            tracing::warn!("{}，使用默认值", err);
            None
        }
    }
}
