use anyhow::Result;
use doc_batch_orchestrator::app::App;
use doc_batch_orchestrator::utils::logger;
use doc_batch_orchestrator::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：CONFIG_FILE 指向 TOML 文件时优先使用，否则读取环境变量
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => Config::from_toml_file(path)?,
        Err(_) => Config::from_env()?,
    };

    // 初始化日志
    logger::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config)?.run().await?;

    Ok(())
}
