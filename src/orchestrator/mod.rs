//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量记录处理器
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载记录（Vec<RecordInput>）
//! - 控制并发数量（Semaphore）
//! - 持有浏览器资源（经由 SessionFactory）
//! - 写入结果文件并输出全局统计信息
//!
//! ### `record_processor` - 单条记录处理器
//! - 账本预检
//! - 每次尝试打开新会话，结束时关闭
//! - 有限次重试可恢复的失败
//! - 响应关闭信号
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<RecordInput>)
//!     ↓
//! record_processor (处理单条记录的多次尝试)
//!     ↓
//! workflow::RecordFlow (处理一次尝试)
//!     ↓
//! services (能力层：readiness / resolver / writer / submission / extractor)
//!     ↓
//! infrastructure (基础设施：FormDriver / FormSession)
//! ```

pub mod batch_processor;
pub mod record_processor;

// 重新导出主要类型
pub use batch_processor::{App, BatchProcessor};
pub use record_processor::{process_record, RetryPolicy};
