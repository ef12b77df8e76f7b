//! 服务运行时

use twinguard_config::AppConfig;
use twinguard_errors::AppResult;
use twinguard_telemetry::{init_metrics, init_tracing_for_env};
use tracing::{error, info};

/// 服务运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: std::env::var("TWINGUARD_CONFIG_DIR").unwrap_or_else(|_| "config".to_string()),
        }
    }
}

/// 初始化服务运行时：日志与指标
pub fn init_runtime(config: &AppConfig) -> AppResult<()> {
    init_tracing_for_env(&config.app_env, &config.telemetry.log_level);
    init_metrics(config.telemetry.metrics_port)?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        instance_index = config.instance_index,
        metrics_port = ?config.telemetry.metrics_port,
        "Runtime initialized"
    );
    Ok(())
}

/// 等待关闭信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
