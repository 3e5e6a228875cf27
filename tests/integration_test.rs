//! 真实浏览器上的端到端测试
//!
//! 需要本机安装 Chrome/Chromium（或用 CHROME_EXECUTABLE 指定），默认忽略：
//! cargo test -- --ignored

mod common;

use std::sync::Arc;

use common::form_spec;
use form_pilot::browser::launch_headless_browser;
use form_pilot::config::Config;
use form_pilot::infrastructure::{ChromeSessionFactory, SessionFactory};
use form_pilot::models::{ReportKind, RecordInput};
use form_pilot::orchestrator::{process_record, RetryPolicy};
use form_pilot::services::IdempotencyLedger;
use form_pilot::utils::logging;
use form_pilot::workflow::RecordFlow;
use tokio::sync::watch;

const FORM_HTML: &str = r#"<!doctype html>
<html><body>
<select id="package">
  <option value="">-- select --</option>
  <option value="1">Bangkok-Chiangmai-01</option>
  <option value="2">Bangkok-Phuket-02</option>
</select>
<select id="period"><option value="">-- select --</option></select>
<input id="amount">
<textarea id="remark"></textarea>
<button id="submit" type="button">Save</button>
<div class="alert-success"></div>
<div class="alert-danger"></div>
<script>
const groups = { "1": [["90", "GRP-090"]], "2": [["100", "GRP-100"], ["101", "GRP-101"]] };
document.getElementById("package").addEventListener("change", (e) => {
  setTimeout(() => {
    const period = document.getElementById("period");
    period.innerHTML = '<option value="">-- select --</option>';
    for (const [value, label] of groups[e.target.value] || []) {
      period.add(new Option(label, value));
    }
  }, 300);
});
document.getElementById("submit").addEventListener("click", () => {
  setTimeout(() => {
    document.querySelector(".alert-success").textContent = "Saved, reference C2025XX-0042";
  }, 200);
});
</script>
</body></html>"#;

fn data_url(html: &str) -> String {
    let mut url = String::from("data:text/html;charset=utf-8,");
    for c in html.chars() {
        match c {
            '%' => url.push_str("%25"),
            '#' => url.push_str("%23"),
            '\n' => url.push_str("%0A"),
            ' ' => url.push_str("%20"),
            '"' => url.push_str("%22"),
            _ => url.push(c),
        }
    }
    url
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_fill_cascading_form_in_headless_browser() {
    // 初始化日志
    logging::init(true, None);

    // 加载配置
    let config = Config::from_env();

    let browser = launch_headless_browser(config.chrome_executable.as_deref())
        .await
        .expect("启动浏览器失败");
    let factory = ChromeSessionFactory::new(browser);

    let mut spec = form_spec();
    spec.url = data_url(FORM_HTML);
    let flow = RecordFlow::new(Arc::new(spec), config.timeouts(), IdempotencyLedger::in_memory())
        .expect("创建流程失败");

    let record = RecordInput::new(
        1,
        [
            ("program".to_string(), "Phuket".to_string()),
            ("tour_code".to_string(), "101".to_string()),
            ("amount".to_string(), "1500".to_string()),
        ]
        .into(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = process_record(&factory, &flow, &record, RetryPolicy::default(), rx).await;

    assert_eq!(report.kind, ReportKind::Success, "{:?}", report);
    assert_eq!(report.identifier.as_deref(), Some("C2025XX-0042"));
}

#[tokio::test]
#[ignore]
async fn test_session_factory_opens_pages() {
    // 初始化日志
    logging::init(false, None);

    // 加载配置
    let config = Config::from_env();

    let browser = launch_headless_browser(config.chrome_executable.as_deref())
        .await
        .expect("启动浏览器失败");
    let factory = ChromeSessionFactory::new(browser);

    let driver = factory.open().await;
    assert!(driver.is_ok(), "应该能够打开新页面");
    driver.unwrap().close().await.expect("关闭页面失败");
}
