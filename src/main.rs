use anyhow::Result;
use form_pilot::utils::logging;
use form_pilot::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    let log_file = logging::init_log_file(&config.output_log_file)?;
    logging::init(config.verbose_logging, Some(log_file));

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
