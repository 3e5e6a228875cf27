//! 批量记录处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量记录的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：启动日志文件、获取浏览器、加载表单描述和幂等账本
//! 2. **批量加载**：读取所有待处理的记录（`Vec<RecordInput>`）
//! 3. **并发控制**：使用 Semaphore 限制并发数量，每条记录独占一个页面
//! 4. **分批处理**：将记录分批次处理，每批完成后再开始下一批
//! 5. **结果落盘**：每条记录的报告写入结果文件，需要核对的另写一份
//! 6. **全局统计**：汇总所有记录的处理结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单条记录的细节
//! - **资源所有者**：唯一持有浏览器（经由会话工厂）的模块
//! - **向下委托**：委托 record_processor 处理单条记录

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::browser;
use crate::config::Config;
use crate::infrastructure::{ChromeSessionFactory, SessionFactory};
use crate::models::{RecordInput, RecordReport};
use crate::orchestrator::record_processor::{self, RetryPolicy};
use crate::services::{IdempotencyLedger, ReportWriter};
use crate::utils::logging::{self, ProcessingStats};
use crate::workflow::RecordFlow;

/// 批量处理器
///
/// 不依赖具体浏览器，只通过会话工厂打开页面
pub struct BatchProcessor {
    factory: Arc<dyn SessionFactory>,
    flow: Arc<RecordFlow>,
    writer: Option<Arc<ReportWriter>>,
    policy: RetryPolicy,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        flow: Arc<RecordFlow>,
        policy: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            factory,
            flow,
            writer: None,
            policy,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 每条记录完成后写入报告文件
    pub fn with_writer(mut self, writer: ReportWriter) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// 处理所有记录，返回按记录顺序排列的报告
    pub async fn process_all(
        &self,
        records: Vec<RecordInput>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Vec<RecordReport>, ProcessingStats)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let total = records.len();
        let total_batches = total.div_ceil(self.max_concurrent);
        let mut stats = ProcessingStats::default();
        let mut reports = Vec::with_capacity(total);

        // 分批处理
        for (batch_idx, batch) in records.chunks(self.max_concurrent).enumerate() {
            if *shutdown.borrow() {
                warn!("🛑 收到关闭信号，剩余记录不再处理");
                break;
            }

            let batch_start = batch_idx * self.max_concurrent;
            logging::log_batch_start(
                batch_idx + 1,
                total_batches,
                batch_start + 1,
                batch_start + batch.len(),
                total,
            );

            let batch_reports = self
                .process_batch(batch, semaphore.clone(), shutdown.clone())
                .await?;

            let mut batch_stats = ProcessingStats::default();
            for report in &batch_reports {
                batch_stats.add(report);
            }
            logging::log_batch_complete(batch_idx + 1, &batch_stats);

            stats.merge(&batch_stats);
            reports.extend(batch_reports);
        }

        Ok((reports, stats))
    }

    /// 处理单个批次
    async fn process_batch(
        &self,
        batch: &[RecordInput],
        semaphore: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<RecordReport>> {
        let mut handles = Vec::with_capacity(batch.len());

        // 为本批创建并发任务
        for record in batch {
            let permit = semaphore.clone().acquire_owned().await?;
            let factory = self.factory.clone();
            let flow = self.flow.clone();
            let writer = self.writer.clone();
            let policy = self.policy;
            let shutdown = shutdown.clone();
            let record = record.clone();
            let index = record.index();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let report = record_processor::process_record(
                    factory.as_ref(),
                    &flow,
                    &record,
                    policy,
                    shutdown,
                )
                .await;

                if let Some(writer) = writer {
                    if let Err(e) = writer.write(&report).await {
                        error!("[记录 {}] ❌ 写入结果文件失败: {}", record.index(), e);
                    }
                }
                report
            });
            handles.push((index, handle));
        }

        // 等待本批所有任务完成
        let mut reports = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => error!("[记录 {}] 任务执行失败: {}", index, e),
            }
        }
        Ok(reports)
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    processor: BatchProcessor,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let spec = crate::models::load_form_spec(Path::new(&config.form_spec_file)).await?;
        let spec = Arc::new(spec);
        logging::log_startup(&spec.name, config.max_concurrent_records);

        // 获取浏览器
        let browser = if config.launch_headless {
            browser::launch_headless_browser(config.chrome_executable.as_deref()).await?
        } else {
            browser::connect_to_browser(config.browser_debug_port).await?
        };
        let factory: Arc<dyn SessionFactory> = Arc::new(ChromeSessionFactory::new(browser));

        // 幂等账本
        let ledger = match &config.ledger_file {
            Some(path) => IdempotencyLedger::persistent(path).await?,
            None => {
                info!("💡 未设置 LEDGER_FILE，幂等账本只在本次运行内有效");
                IdempotencyLedger::in_memory()
            }
        };

        let flow = Arc::new(RecordFlow::new(spec, config.timeouts(), ledger)?);
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
        };
        let processor = BatchProcessor::new(factory, flow, policy, config.max_concurrent_records)
            .with_writer(ReportWriter::new(&config.results_file, &config.review_file));

        Ok(Self { config, processor })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        // 加载所有待处理的记录
        info!("\n📁 正在读取待处理的记录...");
        let records = crate::models::load_records(
            Path::new(&self.config.records_file),
            self.config.records_start,
            self.config.records_limit,
        )
        .await?;

        if records.is_empty() {
            warn!("⚠️ 没有找到待处理的记录，程序结束");
            return Ok(());
        }

        let total = records.len();
        logging::log_records_loaded(total, self.config.max_concurrent_records);

        // Ctrl-C 触发关闭信号
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 收到 Ctrl-C，正在结束当前尝试并释放页面...");
                let _ = shutdown_tx.send(true);
            }
        });

        // 处理所有记录
        let (_, stats) = self.processor.process_all(records, shutdown_rx).await?;

        // 输出最终统计
        logging::print_final_stats(
            &stats,
            total,
            &self.config.review_file,
            &self.config.output_log_file,
        );

        Ok(())
    }
}
