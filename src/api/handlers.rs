use crate::api::in_flight::{InFlight, LEDGER_KEY};
use crate::error::ReconcileError;
use crate::models::{DateWindow, JobStatus, RebuildTarget, RunStatus};
use crate::service::ReconcileService;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 共享状态: 对账服务 + 进行中窗口
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReconcileService>,
    pub in_flight: InFlight,
}

impl AppState {
    pub fn new(service: Arc<ReconcileService>) -> Self {
        Self {
            service,
            in_flight: InFlight::new(),
        }
    }
}

/// 请求体: 单渠道窗口
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub channel: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// 请求体: 窗口
#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RebuildRequest {
    pub target: RebuildTarget,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// 可选的 "今天" (回放历史诊断)
#[derive(Debug, Default, Deserialize)]
pub struct TodayParams {
    pub today: Option<NaiveDate>,
}

/// 响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn job_response<T: Serialize>(status: JobStatus, message: String, data: T) -> Response {
    let response = ApiResponse {
        success: status != JobStatus::Error,
        message,
        data: Some(data),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn error_response(e: &ReconcileError) -> Response {
    let code = match e {
        ReconcileError::UnknownChannel(_) => StatusCode::NOT_FOUND,
        ReconcileError::InvalidWindow(_) | ReconcileError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("请求失败: {}", e);
    let response: ApiResponse<()> = ApiResponse {
        success: false,
        message: format!("Error: {}", e),
        data: None,
    };
    (code, Json(response)).into_response()
}

fn conflict_response(what: &str, window: &DateWindow) -> Response {
    let response: ApiResponse<()> = ApiResponse {
        success: false,
        message: format!("{} already running for an overlapping window {}", what, window),
        data: None,
    };
    (StatusCode::CONFLICT, Json(response)).into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 单渠道同步 (不含账本合并)
pub async fn sync_channel(State(state): State<AppState>, Json(req): Json<SyncRequest>) -> Response {
    let window = match DateWindow::new(req.start, req.end) {
        Ok(w) => w,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = state.service.registry().get(&req.channel) {
        return error_response(&e);
    }
    let Some(_guard) = state.in_flight.try_acquire(&req.channel, window) else {
        return conflict_response(&req.channel, &window);
    };

    match state.service.sync_channel(&req.channel, &window).await {
        Ok(report) => job_response(report.status, report.message.clone(), report),
        Err(e) => error_response(&e),
    }
}

/// 全渠道同步 + 账本合并
pub async fn sync_all(State(state): State<AppState>, Json(req): Json<WindowRequest>) -> Response {
    let window = match DateWindow::new(req.start, req.end) {
        Ok(w) => w,
        Err(e) => return error_response(&e),
    };
    let names = state.service.registry().names();
    let keys = names.iter().map(String::as_str).chain(std::iter::once(LEDGER_KEY));
    let Some(_guards) = state.in_flight.try_acquire_all(keys, window) else {
        return conflict_response("sync", &window);
    };

    match state.service.sync_all(&window).await {
        Ok(report) => {
            let message = format!("Synced {} channels", report.syncs.len());
            job_response(report.status, message, report)
        }
        Err(e) => error_response(&e),
    }
}

/// 从渠道表合并账本
pub async fn merge_ledger(State(state): State<AppState>, Json(req): Json<WindowRequest>) -> Response {
    let window = match DateWindow::new(req.start, req.end) {
        Ok(w) => w,
        Err(e) => return error_response(&e),
    };
    let Some(_guard) = state.in_flight.try_acquire(LEDGER_KEY, window) else {
        return conflict_response(LEDGER_KEY, &window);
    };

    match state.service.merge_ledger(&window).await {
        Ok(report) => job_response(report.status, report.message.clone(), report),
        Err(e) => error_response(&e),
    }
}

/// 手动重建
pub async fn rebuild(State(state): State<AppState>, Json(req): Json<RebuildRequest>) -> Response {
    let window = match DateWindow::new(req.start, req.end) {
        Ok(w) => w,
        Err(e) => return error_response(&e),
    };
    let keys: Vec<&str> = match &req.target {
        RebuildTarget::Ledger => vec![LEDGER_KEY],
        RebuildTarget::Channel(name) => vec![name.as_str(), LEDGER_KEY],
    };
    let Some(_guards) = state.in_flight.try_acquire_all(keys, window) else {
        return conflict_response(&req.target.to_string(), &window);
    };

    match state.service.rebuild(&req.target, &window).await {
        Ok(report) => job_response(report.status, report.message.clone(), report),
        Err(e) => error_response(&e),
    }
}

/// 运行诊断 (含自动修复)
pub async fn run_diagnostics(
    State(state): State<AppState>,
    params: Option<Json<TodayParams>>,
) -> Response {
    let today = params
        .and_then(|Json(p)| p.today)
        .unwrap_or_else(|| Local::now().date_naive());

    // 自动修复会重新拉取渠道并合并账本: 占用全部渠道和账本
    let window = state.service.diagnostics_window(today);
    let names = state.service.registry().names();
    let keys = names.iter().map(String::as_str).chain(std::iter::once(LEDGER_KEY));
    let Some(_guards) = state.in_flight.try_acquire_all(keys, window) else {
        return conflict_response("diagnostics", &window);
    };

    let report = state.service.run_diagnostics_at(today).await;
    let response = ApiResponse {
        success: !matches!(report.status, RunStatus::Error | RunStatus::FatalError),
        message: format!(
            "{:?}: {} issues, {} fixes",
            report.status, report.issues_found, report.fixes_applied
        ),
        data: Some(report),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// 数据源新鲜度
pub async fn freshness(State(state): State<AppState>, Query(params): Query<TodayParams>) -> Response {
    let checks = match params.today {
        Some(day) => state.service.check_freshness_at(day).await,
        None => state.service.check_freshness().await,
    };
    let stale = checks.iter().filter(|c| !c.is_fresh).count();
    let response = ApiResponse {
        success: true,
        message: format!("{} sources, {} stale", checks.len(), stale),
        data: Some(checks),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ChannelConfig, SourceConfig, VendorFormat};
    use crate::db::MemoryWarehouse;
    use crate::models::LedgerColumn;

    fn state() -> AppState {
        let mut config = AppConfig::default();
        config.channels.push(ChannelConfig {
            name: "shopify".into(),
            table: "shopify_daily_sales".into(),
            date_column: "order_date".into(),
            ledger_column: LedgerColumn::ShopifySales,
            vendor: VendorFormat::Shopify,
            source: SourceConfig::JsonDir { path: "/nonexistent".into() },
            excluded_statuses: Vec::new(),
        });
        let warehouse = Arc::new(MemoryWarehouse::for_config(&config));
        AppState::new(Arc::new(ReconcileService::new(config, warehouse)))
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[tokio::test]
    async fn diagnostics_wait_for_a_running_channel_sync() {
        let state = state();
        let params = || Some(Json(TodayParams { today: Some(day(10)) }));

        let held = state.in_flight.try_acquire("shopify", DateWindow::single(day(1))).unwrap();
        let response = run_diagnostics(State(state.clone()), params()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(!state.in_flight.is_running(LEDGER_KEY));

        drop(held);
        let response = run_diagnostics(State(state.clone()), params()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.in_flight.is_running("shopify"));
    }

    #[tokio::test]
    async fn sync_is_rejected_while_diagnostics_hold_the_window() {
        let state = state();
        let window = state.service.diagnostics_window(day(10));
        let _held = state
            .in_flight
            .try_acquire_all(["shopify", LEDGER_KEY], window)
            .unwrap();

        let request = SyncRequest {
            channel: "shopify".into(),
            start: day(9),
            end: day(9),
        };
        let response = sync_channel(State(state.clone()), Json(request)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
