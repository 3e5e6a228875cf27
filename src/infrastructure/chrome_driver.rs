//! 基于 chromiumoxide 的表单驱动
//!
//! 所有控件操作都通过注入 JS 完成。选择器是 CSS 选择器；
//! 对 bootstrap-selectpicker 这类包装过的下拉框，赋值后会同步刷新插件。

use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, BrowserError};
use crate::infrastructure::driver::{FormDriver, SessionFactory, SubmitDispatch};
use crate::infrastructure::JsExecutor;
use crate::models::{ControlRef, ControlState};

/// chromiumoxide 表单驱动
pub struct ChromeDriver {
    executor: JsExecutor,
}

impl ChromeDriver {
    pub fn new(page: Page) -> Self {
        Self {
            executor: JsExecutor::new(page),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApplyResult {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl FormDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> AppResult<()> {
        debug!("导航到: {}", url);
        self.executor
            .page()
            .goto(url)
            .await
            .map_err(|e| navigation_failed(url, e))?;
        self.executor
            .page()
            .wait_for_navigation()
            .await
            .map_err(|e| navigation_failed(url, e))?;
        Ok(())
    }

    async fn read_control(&self, control: &ControlRef) -> AppResult<ControlState> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelector({selector});
                if (!el) {{
                    return {{ present: false }};
                }}
                const style = window.getComputedStyle(el);
                const visible = style.display !== 'none' && style.visibility !== 'hidden';
                const state = {{
                    present: true,
                    interactive: visible && !el.disabled && !el.readOnly,
                    value: ('value' in el && el.tagName !== 'BUTTON') ? String(el.value) : null,
                    text: (el.innerText || el.textContent || '').trim(),
                    options: []
                }};
                if (el.tagName === 'SELECT') {{
                    state.options = Array.from(el.options).map(o => ({{
                        value: String(o.value),
                        label: (o.text || '').trim()
                    }}));
                    state.text = null;
                }}
                if (el.type === 'checkbox' || el.type === 'radio') {{
                    state.value = el.checked ? 'on' : 'off';
                }}
                return state;
            }})()
            "#,
            selector = serde_json::to_string(&control.selector)?
        );

        self.executor.eval_as(js_code).await
    }

    async fn apply_value(&self, control: &ControlRef, value: &str) -> AppResult<()> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelector({selector});
                const value = {value};
                if (!el) {{
                    return {{ ok: false, error: 'element not found' }};
                }}
                if (el.tagName === 'SELECT') {{
                    el.value = value;
                    if (window.jQuery && typeof window.jQuery.fn.selectpicker === 'function') {{
                        window.jQuery(el).selectpicker('val', value);
                    }}
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return {{ ok: true }};
                }}
                if (el.type === 'checkbox' || el.type === 'radio') {{
                    const wanted = value === 'on' || value === 'true';
                    if (el.checked !== wanted) {{
                        el.click();
                    }}
                    return {{ ok: true }};
                }}
                if (el.tagName === 'BUTTON' || el.tagName === 'A' || !('value' in el)) {{
                    el.click();
                    return {{ ok: true }};
                }}
                el.focus();
                el.value = value;
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                el.blur();
                return {{ ok: true }};
            }})()
            "#,
            selector = serde_json::to_string(&control.selector)?,
            value = serde_json::to_string(value)?
        );

        let result: ApplyResult = self.executor.eval_as(js_code).await?;
        if result.ok {
            Ok(())
        } else {
            Err(AppError::Other(format!(
                "控件 {} 赋值失败: {}",
                control,
                result.error.unwrap_or_default()
            )))
        }
    }

    async fn execute_submit(&self, control: &ControlRef) -> AppResult<SubmitDispatch> {
        // 点击放到下一个事件循环里执行，保证 evaluate 的返回先于页面跳转到达
        let js_code = format!(
            r#"
            (() => {{
                const btn = document.querySelector({selector});
                if (!btn || btn.disabled) {{
                    return {{ ok: false, error: btn ? 'submit control disabled' : 'submit control not found' }};
                }}
                btn.scrollIntoView({{ behavior: 'instant', block: 'center' }});
                setTimeout(() => btn.click(), 0);
                return {{ ok: true }};
            }})()
            "#,
            selector = serde_json::to_string(&control.selector)?
        );

        match self.executor.eval_as::<ApplyResult>(js_code).await {
            Ok(result) if result.ok => Ok(SubmitDispatch::Sent),
            Ok(result) => Err(AppError::Other(format!(
                "提交未下发: {}",
                result.error.unwrap_or_default()
            ))),
            Err(e) => {
                // 脚本已经发出但结果没有回来，点击可能已经发生
                warn!("提交脚本返回前连接中断: {}", e);
                Ok(SubmitDispatch::LinkLost {
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> AppResult<()> {
        self.executor.page().clone().close().await?;
        Ok(())
    }
}

fn navigation_failed(url: &str, err: chromiumoxide::error::CdpError) -> AppError {
    AppError::Browser(BrowserError::NavigationFailed {
        url: url.to_string(),
        source: Box::new(err),
    })
}

/// 每次打开一个新标签页作为独立会话
pub struct ChromeSessionFactory {
    browser: Browser,
}

impl ChromeSessionFactory {
    pub fn new(browser: Browser) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> AppResult<Box<dyn FormDriver>> {
        let page = self.browser.new_page("about:blank").await.map_err(|e| {
            AppError::Browser(BrowserError::PageCreationFailed {
                source: Box::new(e),
            })
        })?;
        Ok(Box::new(ChromeDriver::new(page)))
    }
}
