use skill_scan_guard_lib::config::ScanConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ScanConfig::load()?;
    skill_scan_guard_lib::run(config).await
}
