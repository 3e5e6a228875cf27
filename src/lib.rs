//! # Form Pilot
//!
//! 一个用于把结构化记录批量录入网页表单的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `FormDriver` - 页面驱动边界：导航、读取控件、写入值、触发提交
//! - `FormSession` - 一次尝试独占的页面会话
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个控件或单次提交
//! - `ReadinessMonitor` - 等待就绪条件成立（有超时，不用固定等待）
//! - `SelectorResolver` - 按显示文本解析下拉框选项
//! - `FieldWriter` - 写入并回读确认
//! - `SubmissionController` / `ResultExtractor` - 幂等提交与结果提取
//! - `ReportWriter` - 写结果文件能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条记录"一次尝试的完整处理流程
//! - `RecordCtx` - 上下文封装（记录序号 + 尝试次数 + 幂等键）
//! - `CascadeCoordinator` - 级联下拉框状态机
//! - `RecordFlow` - 流程编排（就绪 → 级联 → 字段 → 提交 → 提取）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量记录处理器，管理资源和并发
//! - `orchestrator/record_processor` - 单条记录处理器，负责重试和会话释放
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, Timeouts};
pub use error::{AppError, AppResult, FormError};
pub use infrastructure::{FormDriver, FormSession, SessionFactory};
pub use models::{FormSpec, RecordInput, RecordReport, SubmissionOutcome};
pub use orchestrator::{process_record, App, BatchProcessor, RetryPolicy};
pub use workflow::{RecordCtx, RecordFlow};
