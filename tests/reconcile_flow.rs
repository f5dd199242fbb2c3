use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use revenue_reconcile::config::{AppConfig, ChannelConfig, FreshnessSource, SourceConfig, VendorFormat};
use revenue_reconcile::db::{MemoryWarehouse, Warehouse};
use async_trait::async_trait;
use revenue_reconcile::error::{FetchError, NotifyError, ReconcileError};
use revenue_reconcile::models::{
    ChannelDailyProductSales, DateWindow, DiagnosticsReport, IssueType, JobStatus, LedgerColumn,
    MasterDailyRecord, RebuildTarget, RunStatus, Severity,
};
use revenue_reconcile::service::{
    ChannelRegistry, LogNotifier, MemorySource, Notifier, OrderSource, ReconcileService,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const LEDGER: &str = "master_daily_sales";

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
}

fn channel(name: &str, vendor: VendorFormat, column: LedgerColumn) -> ChannelConfig {
    ChannelConfig {
        name: name.to_string(),
        table: format!("{name}_daily_sales"),
        date_column: "order_date".to_string(),
        ledger_column: column,
        vendor,
        source: SourceConfig::JsonDir { path: "/nonexistent".into() },
        excluded_statuses: vec!["cancelled".into(), "refunded".into()],
    }
}

fn base_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.retry.initial_backoff_ms = 1;
    cfg.retry.max_backoff_ms = 2;
    cfg.channels = vec![
        channel("shopify", VendorFormat::Shopify, LedgerColumn::ShopifySales),
        channel("amazon", VendorFormat::Amazon, LedgerColumn::AmazonSales),
    ];
    cfg.diagnostics.missing_dates_days = 1;
    cfg
}

struct Harness {
    service: ReconcileService,
    warehouse: Arc<MemoryWarehouse>,
    sources: HashMap<String, Arc<MemorySource>>,
}

/// 投递总是失败的通知渠道
struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn notify(&self, _report: &DiagnosticsReport) -> Result<(), NotifyError> {
        Err(NotifyError::Encode("webhook unreachable".into()))
    }
}

impl Harness {
    fn new(cfg: AppConfig) -> Self {
        Self::with_notifier(cfg, Arc::new(LogNotifier))
    }

    fn with_notifier(cfg: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let warehouse = Arc::new(MemoryWarehouse::for_config(&cfg));
        let mut sources = HashMap::new();
        let registry = ChannelRegistry::with_sources(&cfg, |ch| {
            let source = Arc::new(MemorySource::new(Vec::new()).with_page_size(2));
            sources.insert(ch.name.clone(), source.clone());
            source as Arc<dyn OrderSource>
        });
        let service = ReconcileService::with_parts(cfg, warehouse.clone(), registry, notifier);
        Self {
            service,
            warehouse,
            sources,
        }
    }

    fn source(&self, name: &str) -> &MemorySource {
        self.sources.get(name).unwrap()
    }

    async fn channel_rows(&self, name: &str, window: &DateWindow) -> Vec<ChannelDailyProductSales> {
        self.warehouse
            .load_sales(&format!("{name}_daily_sales"), "order_date", window)
            .await
            .unwrap()
    }

    async fn ledger(&self, window: &DateWindow) -> Vec<MasterDailyRecord> {
        self.warehouse.load_ledger(LEDGER, "date", window).await.unwrap()
    }
}

fn shopify_order(id: &str, created_at: &str, items: &[(&str, i64, &str)]) -> Value {
    let line_items: Vec<Value> = items
        .iter()
        .map(|(sku, qty, price)| json!({ "sku": sku, "title": format!("Heater {sku}"), "quantity": qty, "price": price }))
        .collect();
    json!({
        "name": id,
        "created_at": created_at,
        "financial_status": "paid",
        "line_items": line_items,
    })
}

/// 三个订单, 两个 SKU, 合计 807.00
fn three_orders() -> Vec<Value> {
    vec![
        shopify_order("#1001", "2025-10-01T09:00:00-04:00", &[("HEAT_A", 1, "269.00")]),
        shopify_order("#1002", "2025-10-01T13:30:00-04:00", &[("HEAT_A", 1, "269.00")]),
        shopify_order("#1003", "2025-10-01T18:45:00-04:00", &[("HEAT_B", 1, "269.00")]),
    ]
}

fn sales_row(day: u32, sku: &str, revenue: &str) -> ChannelDailyProductSales {
    ChannelDailyProductSales {
        order_date: date(day),
        product_id: 1,
        sku: sku.to_string(),
        product_name: sku.to_string(),
        total_quantity_sold: 1,
        avg_unit_price: dec(revenue),
        total_revenue: dec(revenue),
        order_count: 1,
    }
}

#[tokio::test]
async fn end_to_end_three_orders_two_skus() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    let window = DateWindow::single(date(1));

    let report = h.service.sync_channel("shopify", &window).await.unwrap();
    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.orders_fetched, 3);
    assert_eq!(report.rows_inserted, 2);
    assert_eq!(report.revenue, dec("807.00"));

    let rows = h.channel_rows("shopify", &window).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].sku, "HEAT_A");
    assert_eq!(rows[0].total_quantity_sold, 2);
    assert_eq!(rows[0].total_revenue, dec("538.00"));
    assert_eq!(rows[0].order_count, 2);
    assert_eq!(rows[1].sku, "HEAT_B");

    let merge = h.service.merge_ledger(&window).await.unwrap();
    assert_eq!(merge.dates_created, 1);

    let ledger = h.ledger(&window).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].shopify_sales, dec("807.00"));
    assert_eq!(ledger[0].amazon_sales, BigDecimal::zero());
    assert_eq!(ledger[0].total_sales, dec("807.00"));
    assert!(ledger[0].is_additive());
}

#[tokio::test]
async fn repeated_sync_and_merge_is_idempotent() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    let window = DateWindow::new(date(1), date(3)).unwrap();

    let first = h.service.sync_all(&window).await.unwrap();
    let rows_first = h.channel_rows("shopify", &window).await;
    let ledger_first = h.ledger(&window).await;

    let second = h.service.sync_all(&window).await.unwrap();
    let rows_second = h.channel_rows("shopify", &window).await;
    let ledger_second = h.ledger(&window).await;

    assert_eq!(first.status, JobStatus::Success);
    assert_eq!(second.status, JobStatus::Success);
    assert_eq!(rows_first, rows_second);
    assert_eq!(ledger_first.len(), 1);
    assert_eq!(ledger_first, ledger_second);

    let merge = second.merge.unwrap();
    assert_eq!(merge.dates_updated, 0);
    assert_eq!(merge.dates_unchanged, 1);
}

#[tokio::test]
async fn resync_to_zero_orders_clears_window_and_ledger() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    let window = DateWindow::single(date(1));
    h.service.sync_all(&window).await.unwrap();
    assert_eq!(h.ledger(&window).await[0].total_sales, dec("807.00"));

    // 订单全部退款
    h.source("shopify").set_orders(Vec::new());
    let report = h.service.sync_all(&window).await.unwrap();
    assert_eq!(report.syncs[0].rows_deleted, 2);
    assert_eq!(report.syncs[0].rows_inserted, 0);

    assert!(h.channel_rows("shopify", &window).await.is_empty());
    let ledger = h.ledger(&window).await;
    assert_eq!(ledger[0].shopify_sales, BigDecimal::zero());
    assert_eq!(ledger[0].total_sales, BigDecimal::zero());
}

#[tokio::test]
async fn excluded_statuses_and_bad_dates_are_counted() {
    let h = Harness::new(base_config());
    let mut orders = three_orders();
    orders.push(json!({
        "name": "#1004",
        "created_at": "2025-10-01T10:00:00Z",
        "financial_status": "refunded",
        "line_items": [{ "sku": "HEAT_A", "quantity": 5, "price": "269.00" }],
    }));
    orders.push(json!({
        "name": "#1005",
        "created_at": "not a date",
        "financial_status": "paid",
        "line_items": [{ "sku": "HEAT_A", "quantity": 1, "price": "269.00" }],
    }));
    h.source("shopify").set_orders(orders);

    let report = h
        .service
        .sync_channel("shopify", &DateWindow::single(date(1)))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::PartialFailure);
    assert_eq!(report.normalize.orders_skipped, 1);
    assert_eq!(report.normalize.lines_dropped, 1);
    assert_eq!(report.revenue, dec("807.00"));
}

#[tokio::test]
async fn partial_replace_blocks_ledger_merge() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    let window = DateWindow::single(date(1));
    h.service.sync_all(&window).await.unwrap();

    h.warehouse.fail_inserts("shopify_daily_sales", true);
    let report = h.service.sync_all(&window).await.unwrap();

    let shopify = report.syncs.iter().find(|s| s.channel == "shopify").unwrap();
    assert!(shopify.partial_replace);
    assert_eq!(shopify.status, JobStatus::Error);
    assert_eq!(report.status, JobStatus::Error);
    assert!(report.merge.is_none());

    // 渠道表已被清空, 账本保持上一次完整合并的值
    assert!(h.channel_rows("shopify", &window).await.is_empty());
    assert_eq!(h.ledger(&window).await[0].shopify_sales, dec("807.00"));

    // 手动重建渠道后恢复
    h.warehouse.fail_inserts("shopify_daily_sales", false);
    let rebuilt = h
        .service
        .rebuild(&RebuildTarget::Channel("shopify".into()), &window)
        .await
        .unwrap();
    assert_eq!(rebuilt.status, JobStatus::Success);
    assert_eq!(h.channel_rows("shopify", &window).await.len(), 2);
}

#[tokio::test]
async fn channel_rebuild_skips_merge_after_partial_replace() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    h.warehouse.fail_inserts("shopify_daily_sales", true);

    let report = h
        .service
        .rebuild(&RebuildTarget::Channel("shopify".into()), &DateWindow::single(date(1)))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Error);
    assert!(report.sync.unwrap().partial_replace);
    assert!(report.merge.is_none());
}

#[tokio::test]
async fn transient_fetch_failure_keeps_existing_rows() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    let window = DateWindow::single(date(1));
    h.service.sync_channel("shopify", &window).await.unwrap();

    for _ in 0..4 {
        h.source("shopify").push_failure(FetchError::Transient("timeout".into()));
    }
    let report = h.service.sync_channel("shopify", &window).await.unwrap();
    assert_eq!(report.status, JobStatus::Error);
    assert!(!report.partial_replace);
    assert_eq!(h.channel_rows("shopify", &window).await.len(), 2);
}

#[tokio::test]
async fn unauthorized_propagates_as_configuration_error() {
    let h = Harness::new(base_config());
    h.source("amazon").push_failure(FetchError::Unauthorized {
        status: 403,
        message: "token expired".into(),
    });

    let err = h
        .service
        .sync_channel("amazon", &DateWindow::single(date(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized { ref channel, .. } if channel == "amazon"));
    assert_eq!(h.source("amazon").calls(), 1);
}

#[tokio::test]
async fn unknown_channel_is_rejected() {
    let h = Harness::new(base_config());
    let err = h
        .service
        .sync_channel("ebay", &DateWindow::single(date(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::UnknownChannel(_)));
}

#[tokio::test]
async fn amazon_flat_report_rows_feed_their_own_column() {
    let h = Harness::new(base_config());
    h.source("amazon").set_orders(vec![
        json!({ "amazon-order-id": "111-1", "purchase-date": "2025-10-02T08:00:00Z", "order-status": "Shipped",
                "sku": "HEAT_A", "product-name": "Heater A", "quantity-purchased": "2", "item-price": "538.00" }),
        json!({ "amazon-order-id": "111-2", "purchase-date": "2025-10-02T09:00:00Z", "order-status": "Cancelled",
                "sku": "HEAT_A", "quantity-purchased": "1", "item-price": "269.00" }),
    ]);
    let window = DateWindow::single(date(2));
    h.service.sync_all(&window).await.unwrap();

    let rows = h.channel_rows("amazon", &window).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].avg_unit_price, dec("269.00"));

    let ledger = h.ledger(&window).await;
    assert_eq!(ledger[0].amazon_sales, dec("538.00"));
    assert_eq!(ledger[0].shopify_sales, BigDecimal::zero());
    assert_eq!(ledger[0].total_sales, dec("538.00"));

    let totals = h.service.roll_up("amazon", &window).await.unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].revenue, dec("538.00"));
}

#[tokio::test]
async fn drift_of_fifteen_percent_is_detected_and_healed() {
    let h = Harness::new(base_config());
    h.source("amazon").set_orders(vec![
        json!({ "amazon-order-id": "111-3", "purchase-date": "2025-10-09T08:00:00Z", "order-status": "Shipped",
                "sku": "HEAT_A", "quantity-purchased": "1", "item-price": "600.00" }),
        json!({ "amazon-order-id": "111-4", "purchase-date": "2025-10-09T09:00:00Z", "order-status": "Shipped",
                "sku": "HEAT_B", "quantity-purchased": "1", "item-price": "400.00" }),
    ]);
    h.service
        .sync_channel("amazon", &DateWindow::single(date(9)))
        .await
        .unwrap();
    // 历史累加式合并留下的 1150
    let mut drifted = MasterDailyRecord::empty(date(9), "USD");
    drifted.amazon_sales = dec("1150.00");
    drifted.recompute_total();
    h.warehouse.seed_ledger(LEDGER, vec![drifted]);

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_ne!(report.status, RunStatus::Healthy);
    assert_eq!(report.status, RunStatus::Healed);

    let drift = report
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::AggregateDrift)
        .unwrap();
    assert_eq!(drift.severity, Severity::Warning);
    // 账本高于渠道表: 先重新拉取渠道, 再合并账本
    assert!(report.fixes[0].action.starts_with("rebuild channel:amazon"));
    assert!(report.fixes[1].action.starts_with("rebuild ledger"));
    assert!(report.fixes.iter().all(|f| f.success));
    assert_eq!(report.fixes_applied, report.fixes.len());

    let ledger = h.ledger(&DateWindow::single(date(9))).await;
    assert_eq!(ledger[0].amazon_sales, dec("1000.00"));
    assert_eq!(ledger[0].total_sales, dec("1000.00"));

    // 修复后再跑一次
    let again = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(again.status, RunStatus::Healthy);
    assert_eq!(again.issues_found, 0);
}

#[tokio::test]
async fn drift_is_only_reported_when_auto_fix_is_off() {
    let mut cfg = base_config();
    cfg.diagnostics.auto_fix = false;
    let h = Harness::new(cfg);
    h.warehouse.seed_sales("amazon_daily_sales", vec![sales_row(9, "HEAT_A", "1000.00")]);
    let mut drifted = MasterDailyRecord::empty(date(9), "USD");
    drifted.amazon_sales = dec("2000.00");
    drifted.recompute_total();
    h.warehouse.seed_ledger(LEDGER, vec![drifted]);

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::IssuesDetected);
    assert!(report.fixes.is_empty());
    let drift = report
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::AggregateDrift)
        .unwrap();
    assert_eq!(drift.severity, Severity::Critical);
    assert_eq!(h.ledger(&DateWindow::single(date(9))).await[0].amazon_sales, dec("2000.00"));
}

#[tokio::test]
async fn non_additive_ledger_row_is_rebuilt() {
    let h = Harness::new(base_config());
    h.warehouse.seed_sales("shopify_daily_sales", vec![sales_row(9, "HEAT_A", "807.00")]);
    let mut broken = MasterDailyRecord::empty(date(9), "USD");
    broken.shopify_sales = dec("807.00");
    broken.total_sales = dec("1614.00");
    h.warehouse.seed_ledger(LEDGER, vec![broken]);

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert!(report
        .issues
        .iter()
        .any(|i| i.issue_type == IssueType::LedgerNotAdditive));
    assert_eq!(report.status, RunStatus::Healed);

    let ledger = h.ledger(&DateWindow::single(date(9))).await;
    assert!(ledger[0].is_additive());
    assert_eq!(ledger[0].total_sales, dec("807.00"));
}

#[tokio::test]
async fn stale_ledger_is_rebuilt_from_channel_tables() {
    let h = Harness::new(base_config());
    h.warehouse.seed_sales(
        "shopify_daily_sales",
        vec![sales_row(5, "HEAT_A", "100.00"), sales_row(9, "HEAT_A", "200.00")],
    );
    let mut old = MasterDailyRecord::empty(date(5), "USD");
    old.shopify_sales = dec("100.00");
    old.recompute_total();
    h.warehouse.seed_ledger(LEDGER, vec![old]);

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert!(report
        .issues
        .iter()
        .any(|i| i.issue_type == IssueType::StaleDerivedTable));
    assert!(report.fixes.iter().all(|f| f.success));

    let ledger = h.ledger(&DateWindow::new(date(1), date(10)).unwrap()).await;
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[1].date, date(9));
    assert_eq!(ledger[1].shopify_sales, dec("200.00"));
}

#[tokio::test]
async fn stale_sources_and_missing_dates_are_reported_only() {
    let mut cfg = base_config();
    cfg.diagnostics.missing_dates_days = 3;
    cfg.freshness = vec![FreshnessSource {
        table_id: "shopify_daily_sales".into(),
        date_column: "order_date".into(),
        threshold_days: 2,
    }];
    let h = Harness::new(cfg);
    h.warehouse.seed_sales("shopify_daily_sales", vec![sales_row(6, "HEAT_A", "50.00")]);
    h.service
        .merge_ledger(&DateWindow::new(date(1), date(10)).unwrap())
        .await
        .unwrap();

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::IssuesDetected);
    let types: Vec<IssueType> = report.issues.iter().map(|i| i.issue_type).collect();
    assert!(types.contains(&IssueType::StaleSource));
    assert!(types.contains(&IssueType::MissingDates));
    assert!(report.fixes.is_empty());
}

#[tokio::test]
async fn failing_checks_mark_the_run_as_errored() {
    let h = Harness::new(base_config());
    h.warehouse.fail_queries(LEDGER, true);

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::Error);
    assert!(!report.errors.is_empty());
}

#[tokio::test]
async fn run_is_fatal_when_no_check_completes() {
    let h = Harness::new(base_config());
    for table in [LEDGER, "shopify_daily_sales", "amazon_daily_sales"] {
        h.warehouse.fail_queries(table, true);
    }

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::FatalError);
    assert_eq!(report.issues_found, 0);
}

#[tokio::test]
async fn channels_sync_concurrently_then_merge_once() {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders());
    h.source("amazon").set_orders(vec![json!({
        "amazon-order-id": "111-9", "purchase-date": "2025-10-01", "order-status": "Shipped",
        "sku": "HEAT_B", "quantity-purchased": 1, "item-price": 193.00
    })]);
    let window = DateWindow::single(date(1));

    let report = h.service.sync_all(&window).await.unwrap();
    assert_eq!(report.syncs.len(), 2);
    assert_eq!(report.status, JobStatus::Success);

    let ledger = h.ledger(&window).await;
    assert_eq!(ledger[0].shopify_sales, dec("807.00"));
    assert_eq!(ledger[0].amazon_sales, dec("193"));
    assert_eq!(ledger[0].total_sales, dec("1000.00"));
}

/// 10-09 当天三个订单, 合计 807.00
fn three_orders_on_ninth() -> Vec<Value> {
    vec![
        shopify_order("#2001", "2025-10-09T09:00:00-04:00", &[("HEAT_A", 1, "269.00")]),
        shopify_order("#2002", "2025-10-09T13:30:00-04:00", &[("HEAT_A", 1, "269.00")]),
        shopify_order("#2003", "2025-10-09T18:45:00-04:00", &[("HEAT_B", 1, "269.00")]),
    ]
}

/// 完整同步后再来一次只删除成功的部分替换
async fn partially_replaced_shopify() -> Harness {
    let h = Harness::new(base_config());
    h.source("shopify").set_orders(three_orders_on_ninth());
    let window = DateWindow::single(date(9));
    h.service.sync_all(&window).await.unwrap();

    h.warehouse.fail_inserts("shopify_daily_sales", true);
    let report = h.service.sync_all(&window).await.unwrap();
    assert!(report.syncs.iter().any(|s| s.partial_replace));
    assert!(report.merge.is_none());
    h.warehouse.fail_inserts("shopify_daily_sales", false);

    assert!(h.channel_rows("shopify", &window).await.is_empty());
    assert_eq!(h.ledger(&window).await[0].shopify_sales, dec("807.00"));
    h
}

#[tokio::test]
async fn emptied_channel_window_is_resynced_before_ledger_merge() {
    let h = partially_replaced_shopify().await;

    let report = h.service.run_diagnostics_at(date(10)).await;
    let drift = report
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::AggregateDrift)
        .unwrap();
    assert_eq!(drift.severity, Severity::Critical);
    assert_eq!(report.status, RunStatus::Healed);
    let actions: Vec<&str> = report.fixes.iter().map(|f| f.action.as_str()).collect();
    assert!(actions[0].starts_with("rebuild channel:shopify"));
    assert!(actions[1].starts_with("rebuild ledger"));

    let window = DateWindow::single(date(9));
    assert_eq!(h.channel_rows("shopify", &window).await.len(), 2);
    let ledger = h.ledger(&window).await;
    assert_eq!(ledger[0].shopify_sales, dec("807.00"));
    assert_eq!(ledger[0].total_sales, dec("807.00"));
}

#[tokio::test]
async fn failed_resync_leaves_ledger_untouched() {
    let h = partially_replaced_shopify().await;
    for _ in 0..4 {
        h.source("shopify").push_failure(FetchError::Transient("503".into()));
    }

    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::IssuesDetected);
    assert_eq!(report.fixes_applied, 0);
    assert!(report
        .fixes
        .iter()
        .any(|f| f.action.starts_with("rebuild ledger") && f.message.starts_with("skipped")));

    // 账本保留上一次完整合并的收入
    let ledger = h.ledger(&DateWindow::single(date(9))).await;
    assert_eq!(ledger[0].shopify_sales, dec("807.00"));
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_run() {
    let h = Harness::with_notifier(base_config(), Arc::new(BrokenNotifier));
    let report = h.service.run_diagnostics_at(date(10)).await;
    // 空账本: 只有昨天缺失日期一个问题
    assert_eq!(report.status, RunStatus::IssuesDetected);
    assert_eq!(report.issues_found, 1);
    assert!(report.errors.is_empty());

    h.source("shopify").set_orders(three_orders_on_ninth());
    h.service.sync_all(&DateWindow::single(date(9))).await.unwrap();
    let report = h.service.run_diagnostics_at(date(10)).await;
    assert_eq!(report.status, RunStatus::Healthy);
    assert!(report.errors.is_empty());
}
