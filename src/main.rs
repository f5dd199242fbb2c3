use axum::{routing::{get, post}, Router};
use revenue_reconcile::{api, create_pool, AppConfig, PgWarehouse, ReconcileService};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式, 级别由 RUST_LOG 控制
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!(
        "Starting server: {} channels, ledger {}, {} freshness sources",
        config.channels.len(),
        config.ledger.table,
        config.freshness.len()
    );

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    let warehouse = PgWarehouse::new(pool, Duration::from_secs(config.database.statement_timeout_secs));
    warehouse.ensure_schema(&config).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let service = Arc::new(ReconcileService::new(config, Arc::new(warehouse)));
    let state = api::AppState::new(service);

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/sync", post(api::sync_channel))
        .route("/api/sync/all", post(api::sync_all))
        .route("/api/ledger/merge", post(api::merge_ledger))
        .route("/api/rebuild", post(api::rebuild))
        .route("/api/diagnostics", post(api::run_diagnostics))
        .route("/api/freshness", get(api::freshness))
        .with_state(state)
        .layer(ServiceBuilder::new());

    // 启动服务器
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/sync          - sync one channel window");
    info!("  POST /api/sync/all      - sync every channel, then merge ledger");
    info!("  POST /api/ledger/merge  - re-merge ledger from channel tables");
    info!("  POST /api/rebuild       - rebuild ledger or channel:<name>");
    info!("  POST /api/diagnostics   - run checks and auto-heal");
    info!("  GET  /api/freshness     - source freshness");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
