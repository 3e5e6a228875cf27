//! 表单会话
//!
//! 一个会话 = 一个页面 + 一张目标表单，只归一次处理尝试所有。

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::error::FormError;
use crate::infrastructure::driver::{bounded, FormDriver};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 会话的导航状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    /// 尚未导航
    Unloaded,
    /// 页面已就绪
    Loaded,
    /// 页面状态已不可信（提交后或后端出错后）
    Stale,
}

/// 表单会话
pub struct FormSession {
    id: u64,
    url: String,
    state: NavState,
    last_good: Option<DateTime<Local>>,
    driver: Box<dyn FormDriver>,
    closed: bool,
}

impl FormSession {
    pub fn new(driver: Box<dyn FormDriver>, url: impl Into<String>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            url: url.into(),
            state: NavState::Unloaded,
            last_good: None,
            driver,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// 最后一次确认页面状态正常的时间
    pub fn last_good(&self) -> Option<DateTime<Local>> {
        self.last_good
    }

    pub fn driver(&self) -> &dyn FormDriver {
        self.driver.as_ref()
    }

    /// 导航到目标表单，`limit` 内没有完成视为超时
    pub async fn load(&mut self, limit: Duration) -> Result<(), FormError> {
        debug!("{} 导航到 {}", self, self.url);
        let action = format!("navigate({})", self.url);
        match bounded(action, limit, self.driver.navigate(&self.url)).await {
            Ok(()) => {
                self.state = NavState::Loaded;
                Ok(())
            }
            Err(e) => {
                self.state = NavState::Stale;
                Err(e)
            }
        }
    }

    /// 记录一次确认过的良好状态
    pub fn mark_good(&mut self) {
        if self.state != NavState::Stale {
            self.last_good = Some(Local::now());
        }
    }

    pub fn mark_stale(&mut self) {
        self.state = NavState::Stale;
    }

    /// 释放会话资源，多次调用只关闭一次
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.driver.close().await {
            warn!("{} 关闭失败: {}", self, e);
        } else {
            debug!("{} 已关闭", self);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Display for FormSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[会话 #{}]", self.id)
    }
}
