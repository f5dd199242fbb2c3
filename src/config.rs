use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::db::check_identifier;
use crate::error::ReconcileError;
use crate::models::{LedgerColumn, RebuildTarget};

/// 应用配置
/// 加载顺序: 默认值 → reconcile.toml (可选) → RECONCILE__* 环境变量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
    pub channels: Vec<ChannelConfig>,
    pub freshness: Vec<FreshnessSource>,
    pub diagnostics: DiagnosticsConfig,
    pub products: Vec<ProductEntry>,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// 单条写入语句超时
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/revenue_reconcile".to_string(),
            max_connections: 20,
            acquire_timeout_secs: 10,
            statement_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub table: String,
    pub date_column: String,
    pub currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: "master_daily_sales".to_string(),
            date_column: "date".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// 供应商拉取重试 (指数退避: 1s, 2s, 4s ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// 供应商订单格式, 决定归一化时的字段映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorFormat {
    Shopify,
    Woocommerce,
    Amazon,
    /// 已重命名列的表格导出
    Canonical,
}

/// 订单来源
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// 目录下的供应商 JSON 订单文件 (每个文件一页)
    JsonDir { path: String },
    /// 表格导出 CSV, columns: 导出列名 → 供应商字段名
    CsvExport {
        path: String,
        #[serde(default)]
        columns: HashMap<String, String>,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
}

fn default_delimiter() -> char {
    ','
}

/// 渠道注册项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub table: String,
    #[serde(default = "default_order_date_column")]
    pub date_column: String,
    pub ledger_column: LedgerColumn,
    pub vendor: VendorFormat,
    pub source: SourceConfig,
    #[serde(default = "default_excluded_statuses")]
    pub excluded_statuses: Vec<String>,
}

fn default_order_date_column() -> String {
    "order_date".to_string()
}

fn default_excluded_statuses() -> Vec<String> {
    ["cancelled", "refunded", "failed", "trash", "voided"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// 新鲜度监控源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessSource {
    pub table_id: String,
    pub date_column: String,
    pub threshold_days: i64,
}

/// 对账规则的权威源表 (每张表有自己的日期列)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    pub table: String,
    #[serde(default = "default_order_date_column")]
    pub date_column: String,
}

/// 派生表 ↔ 权威源 对账规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedRule {
    pub name: String,
    pub derived_table: String,
    pub derived_date_column: String,
    pub derived_column: String,
    /// 多个源表的合计即为权威值
    pub source_tables: Vec<SourceTable>,
    pub source_column: String,
    /// 派生值低于权威值时的重建目标
    pub rebuild: RebuildTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub drift_threshold_pct: f64,
    pub critical_threshold_pct: f64,
    /// 派生表落后源表超过该天数即重建
    pub stale_lag_days: i64,
    pub lookback_days: u32,
    pub missing_dates_days: u32,
    pub auto_fix: bool,
    /// 为空时按渠道注册表生成账本列规则
    pub derived: Vec<DerivedRule>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            drift_threshold_pct: 10.0,
            critical_threshold_pct: 50.0,
            stale_lag_days: 1,
            lookback_days: 30,
            missing_dates_days: 14,
            auto_fix: true,
            derived: Vec::new(),
        }
    }
}

/// 商品目录 (SKU → 商品ID/名称)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductEntry {
    pub sku: String,
    pub product_id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 报告 JSON/CSV 输出目录, 为空时只写日志
    pub report_dir: Option<String>,
}

impl AppConfig {
    /// 从配置文件 + 环境变量加载
    pub fn load() -> Result<Self, ReconcileError> {
        let path = std::env::var("RECONCILE_CONFIG").unwrap_or_else(|_| "reconcile".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("RECONCILE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 配置合法性校验 (配置错误是致命的, 不重试)
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let invalid = |e: crate::error::WarehouseError| ReconcileError::Config(e.to_string());

        check_identifier(&self.ledger.table).map_err(invalid)?;
        check_identifier(&self.ledger.date_column).map_err(invalid)?;

        let mut names = HashSet::new();
        let mut tables = HashSet::new();
        for ch in &self.channels {
            if ch.name.trim().is_empty() {
                return Err(ReconcileError::Config("channel name must not be empty".into()));
            }
            if !names.insert(ch.name.as_str()) {
                return Err(ReconcileError::Config(format!("duplicate channel name: {}", ch.name)));
            }
            if !tables.insert(ch.table.as_str()) {
                return Err(ReconcileError::Config(format!(
                    "channel table {} is registered twice",
                    ch.table
                )));
            }
            if ch.table == self.ledger.table {
                return Err(ReconcileError::Config(format!(
                    "channel {} cannot write to the ledger table",
                    ch.name
                )));
            }
            check_identifier(&ch.table).map_err(invalid)?;
            check_identifier(&ch.date_column).map_err(invalid)?;
        }

        for src in &self.freshness {
            check_identifier(&src.table_id).map_err(invalid)?;
            check_identifier(&src.date_column).map_err(invalid)?;
            if src.threshold_days < 0 {
                return Err(ReconcileError::Config(format!(
                    "negative freshness threshold for {}",
                    src.table_id
                )));
            }
        }

        for rule in &self.diagnostics.derived {
            check_identifier(&rule.derived_table).map_err(invalid)?;
            check_identifier(&rule.derived_date_column).map_err(invalid)?;
            check_identifier(&rule.derived_column).map_err(invalid)?;
            check_identifier(&rule.source_column).map_err(invalid)?;
            if rule.source_tables.is_empty() {
                return Err(ReconcileError::Config(format!("rule {} has no source tables", rule.name)));
            }
            for src in &rule.source_tables {
                check_identifier(&src.table).map_err(invalid)?;
                check_identifier(&src.date_column).map_err(invalid)?;
            }
            if let RebuildTarget::Channel(name) = &rule.rebuild {
                if !names.contains(name.as_str()) {
                    return Err(ReconcileError::UnknownChannel(name.clone()));
                }
            }
        }

        let d = &self.diagnostics;
        if d.drift_threshold_pct <= 0.0 || d.critical_threshold_pct < d.drift_threshold_pct {
            return Err(ReconcileError::Config(
                "drift thresholds must satisfy 0 < drift_threshold_pct <= critical_threshold_pct".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReconcileError::Config("retry.max_attempts must be at least 1".into()));
        }

        Ok(())
    }

    /// 对账规则: 显式配置优先, 否则每个账本列对应其渠道表 total_revenue 之和
    pub fn derived_rules(&self) -> Vec<DerivedRule> {
        if !self.diagnostics.derived.is_empty() {
            return self.diagnostics.derived.clone();
        }

        LedgerColumn::ALL
            .iter()
            .filter_map(|col| {
                let tables: Vec<SourceTable> = self
                    .channels
                    .iter()
                    .filter(|c| c.ledger_column == *col)
                    .map(|c| SourceTable {
                        table: c.table.clone(),
                        date_column: c.date_column.clone(),
                    })
                    .collect();
                if tables.is_empty() {
                    return None;
                }
                Some(DerivedRule {
                    name: format!("ledger.{}", col.as_str()),
                    derived_table: self.ledger.table.clone(),
                    derived_date_column: self.ledger.date_column.clone(),
                    derived_column: col.as_str().to_string(),
                    source_tables: tables,
                    source_column: "total_revenue".to_string(),
                    rebuild: RebuildTarget::Ledger,
                })
            })
            .collect()
    }
}
