pub mod models;
pub mod security;
pub mod services;
pub mod commands;
pub mod config;
pub mod error;

use commands::AppState;
use config::ScanConfig;
use std::future::Future;
use tokio::time::MissedTickBehavior;

/// 启动轮询 worker，直到收到 Ctrl-C
pub async fn run(config: ScanConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    run_until(&state, &config, shutdown).await;
    Ok(())
}

/// 按配置的间隔轮询，`shutdown` 完成时退出（包括轮询进行中）
pub async fn run_until<F>(state: &AppState, config: &ScanConfig, shutdown: F)
where
    F: Future<Output = ()>,
{
    log::info!(
        "Scan worker started: db={}, interval={:?}, batch={}",
        config.database_path.display(),
        config.poll_interval(),
        config.batch_size
    );

    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        // 每个版本的写入各自在事务内完成，中途退出不会留下半写状态
        tokio::select! {
            result = commands::poll_pending_scans(state, None) => match result {
                Ok(summary) if !summary.configured => {
                    log::warn!("Poll skipped: VirusTotal is not configured");
                }
                Ok(summary) => {
                    log::debug!(
                        "Poll finished: processed={}, updated={}, queue={}, healthy={}",
                        summary.processed,
                        summary.updated,
                        summary.queue_size,
                        summary.healthy
                    );
                }
                Err(e) => log::error!("Poll cycle failed: {}", e),
            },
            _ = &mut shutdown => break,
        }
    }

    log::info!("Shutting down scan worker");
}
