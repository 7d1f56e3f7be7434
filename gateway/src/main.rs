//! SQLLuck 后端服务入口
//!
//! 单进程承载全部 HTTP 接口：
//! - 连接管理、查询执行与结构浏览
//! - 性能监控与导入导出
//! - AI 智能问答（SSE）

mod routes;

use anyhow::Context;
use common::config::{load_dotenv, AppConfig};
use connection_service::AppState;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const SERVICE_NAME: &str = "gateway";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // 初始化日志追踪
    let fmt_layer = if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置并恢复已保存的连接
    let config = AppConfig::load_with_service(SERVICE_NAME);
    info!(data_dir = %config.data_dir.display(), "数据目录");
    let state = AppState::bootstrap(config.clone())
        .await
        .context("加载连接配置失败")?;
    let registry = state.registry.clone();

    let app = routes::create_router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    info!(service = SERVICE_NAME, address = %addr, "服务已启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    registry.close_all_connections().await;
    info!("服务已停止");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，准备关闭"),
        _ = terminate => info!("收到 SIGTERM，准备关闭"),
    }
}
