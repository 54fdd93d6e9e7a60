//! 主应用程序入口
//!
//! 加载配置、连接 Postgres 与 Redis，然后启动 Axum WebSocket 服务。

use std::sync::Arc;

use application::{ConnectionLifecycleManager, LifecycleDependencies, SystemClock};
use config::AppConfig;
use infrastructure::{create_pg_pool, PgStorage, RedisCounterStore, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    MIGRATOR.run(&pg_pool).await?;

    let storage = PgStorage::new(pg_pool);
    let counter_store = RedisCounterStore::connect(&config.redis.url).await?;
    let jwt_service = JwtService::new(config.jwt.clone());

    let lifecycle = ConnectionLifecycleManager::new(
        LifecycleDependencies {
            users: storage.user_repository.clone(),
            rooms: storage.room_repository.clone(),
            messages: storage.message_repository.clone(),
            counter_store: Arc::new(counter_store),
            validator: Arc::new(jwt_service),
            clock: Arc::new(SystemClock),
        },
        &config.messaging,
    );

    let app = router(AppState::new(Arc::new(lifecycle)));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天室服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
