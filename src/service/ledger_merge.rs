use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::db::Warehouse;
use crate::error::ReconcileError;
use crate::models::{DateWindow, JobStatus, LedgerColumn, MasterDailyRecord, MergeReport};
use crate::service::registry::ChannelRegistry;

/// 单日合并结果
enum MergeOutcome {
    Created(MasterDailyRecord),
    Updated(MasterDailyRecord),
    Unchanged,
    /// 无贡献且账本无此日期, 不建空行
    Skipped,
}

/// 主账本合并
///
/// 渠道列按绝对值写入, 从不累加: 同一输入合并 N 次与合并 1 次结果相同。
/// 每次写入都重算 total_sales 并校验可加性。
pub struct LedgerMerger {
    warehouse: Arc<dyn Warehouse>,
    ledger: LedgerConfig,
}

impl LedgerMerger {
    pub fn new(warehouse: Arc<dyn Warehouse>, ledger: LedgerConfig) -> Self {
        Self { warehouse, ledger }
    }

    /// 把某一账本列在某天的值设置为 `revenue` (绝对值)
    pub async fn merge(
        &self,
        date: NaiveDate,
        column: LedgerColumn,
        revenue: BigDecimal,
    ) -> Result<Option<MasterDailyRecord>, ReconcileError> {
        let existing = self
            .warehouse
            .load_ledger(&self.ledger.table, &self.ledger.date_column, &DateWindow::single(date))
            .await?
            .into_iter()
            .next();

        let mut contributions = HashMap::new();
        contributions.insert(column, revenue);

        match self.merge_row(date, existing.as_ref(), &contributions)? {
            MergeOutcome::Created(row) | MergeOutcome::Updated(row) => {
                self.warehouse
                    .upsert_ledger(&self.ledger.table, &self.ledger.date_column, std::slice::from_ref(&row))
                    .await?;
                Ok(Some(row))
            }
            MergeOutcome::Unchanged => Ok(existing),
            MergeOutcome::Skipped => Ok(None),
        }
    }

    /// 按渠道合并单日收入
    /// 同一账本列有多个渠道时, 列值为这些渠道当天收入之和
    pub async fn merge_channel(
        &self,
        registry: &ChannelRegistry,
        date: NaiveDate,
        channel_name: &str,
        channel_revenue: BigDecimal,
    ) -> Result<Option<MasterDailyRecord>, ReconcileError> {
        let channel = registry.get(channel_name)?;
        let column = channel.ledger_column();
        let day = DateWindow::single(date);

        let mut value = channel_revenue;
        for sibling in registry.for_column(column).filter(|c| c.name() != channel_name) {
            let sum = self
                .warehouse
                .sum_column(sibling.table(), sibling.date_column(), "total_revenue", &day)
                .await?;
            value += sum;
        }

        self.merge(date, column, value).await
    }

    /// 用渠道表重算窗口内每一天的账本行
    ///
    /// 有渠道映射的列被整体替换 (渠道表当天无数据即写 0);
    /// 未映射的列保持原值。值未变化的行不重写。
    pub async fn merge_window(
        &self,
        registry: &ChannelRegistry,
        window: &DateWindow,
    ) -> Result<MergeReport, ReconcileError> {
        let start = Instant::now();

        // 列 → 日期 → 收入
        let mut by_column: BTreeMap<LedgerColumn, HashMap<NaiveDate, BigDecimal>> = BTreeMap::new();
        for channel in registry.iter() {
            let sums = self
                .warehouse
                .daily_sums(channel.table(), channel.date_column(), "total_revenue", window)
                .await?;
            let column = by_column.entry(channel.ledger_column()).or_default();
            for (date, revenue) in sums {
                *column.entry(date).or_insert_with(BigDecimal::zero) += revenue;
            }
        }

        let existing: HashMap<NaiveDate, MasterDailyRecord> = self
            .warehouse
            .load_ledger(&self.ledger.table, &self.ledger.date_column, window)
            .await?
            .into_iter()
            .map(|r| (r.date, r))
            .collect();

        let mut report = MergeReport {
            window: *window,
            status: JobStatus::Success,
            message: String::new(),
            dates_created: 0,
            dates_updated: 0,
            dates_unchanged: 0,
        };
        let mut pending = Vec::new();

        for date in window.days() {
            let contributions: HashMap<LedgerColumn, BigDecimal> = by_column
                .iter()
                .map(|(col, dates)| (*col, dates.get(&date).cloned().unwrap_or_else(BigDecimal::zero)))
                .collect();

            match self.merge_row(date, existing.get(&date), &contributions)? {
                MergeOutcome::Created(row) => {
                    report.dates_created += 1;
                    pending.push(row);
                }
                MergeOutcome::Updated(row) => {
                    report.dates_updated += 1;
                    pending.push(row);
                }
                MergeOutcome::Unchanged => report.dates_unchanged += 1,
                MergeOutcome::Skipped => {}
            }
        }

        if !pending.is_empty() {
            self.warehouse
                .upsert_ledger(&self.ledger.table, &self.ledger.date_column, &pending)
                .await?;
        }

        report.message = format!(
            "{} created, {} updated, {} unchanged",
            report.dates_created, report.dates_updated, report.dates_unchanged
        );
        info!("账本合并完成 {}: {}, 耗时 {:?}", window, report.message, start.elapsed());
        Ok(report)
    }

    fn merge_row(
        &self,
        date: NaiveDate,
        existing: Option<&MasterDailyRecord>,
        contributions: &HashMap<LedgerColumn, BigDecimal>,
    ) -> Result<MergeOutcome, ReconcileError> {
        let mut row = existing
            .cloned()
            .unwrap_or_else(|| MasterDailyRecord::empty(date, &self.ledger.currency));

        for (column, value) in contributions {
            row.set(*column, value.clone());
        }
        row.recompute_total();

        if !row.is_additive() {
            return Err(ReconcileError::Invariant(format!(
                "{}: total_sales {} != channel sum {}",
                date,
                row.total_sales,
                row.channel_sum()
            )));
        }

        match existing {
            Some(old) if old.same_values(&row) => Ok(MergeOutcome::Unchanged),
            Some(_) => {
                row.created_at = Utc::now();
                debug!("账本更新 {}: total_sales={}", date, row.total_sales);
                Ok(MergeOutcome::Updated(row))
            }
            None if row.total_sales.is_zero() => Ok(MergeOutcome::Skipped),
            None => {
                row.created_at = Utc::now();
                Ok(MergeOutcome::Created(row))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ChannelConfig, SourceConfig, VendorFormat};
    use crate::db::MemoryWarehouse;
    use crate::models::ChannelDailyProductSales;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn channel(name: &str, column: LedgerColumn) -> ChannelConfig {
        ChannelConfig {
            name: name.to_string(),
            table: format!("{name}_daily_sales"),
            date_column: "order_date".to_string(),
            ledger_column: column,
            vendor: VendorFormat::Canonical,
            source: SourceConfig::JsonDir { path: "/nonexistent".into() },
            excluded_statuses: Vec::new(),
        }
    }

    fn sales(day: u32, revenue: &str) -> ChannelDailyProductSales {
        ChannelDailyProductSales {
            order_date: date(day),
            product_id: 1,
            sku: "A".to_string(),
            product_name: "A".to_string(),
            total_quantity_sold: 1,
            avg_unit_price: dec(revenue),
            total_revenue: dec(revenue),
            order_count: 1,
        }
    }

    fn setup(channels: Vec<ChannelConfig>) -> (Arc<MemoryWarehouse>, LedgerMerger, ChannelRegistry, AppConfig) {
        let mut config = AppConfig::default();
        config.channels = channels;
        let wh = Arc::new(MemoryWarehouse::for_config(&config));
        let merger = LedgerMerger::new(wh.clone(), config.ledger.clone());
        let registry = ChannelRegistry::from_config(&config);
        (wh, merger, registry, config)
    }

    #[tokio::test]
    async fn merge_sets_absolute_value_and_keeps_other_columns() {
        let (wh, merger, _, config) = setup(vec![]);
        let mut seeded = MasterDailyRecord::empty(date(1), "USD");
        seeded.amazon_sales = dec("100");
        seeded.recompute_total();
        wh.seed_ledger(&config.ledger.table, vec![seeded]);

        merger.merge(date(1), LedgerColumn::ShopifySales, dec("807")).await.unwrap();
        merger.merge(date(1), LedgerColumn::ShopifySales, dec("807")).await.unwrap();

        let rows = wh
            .load_ledger(&config.ledger.table, "date", &DateWindow::single(date(1)))
            .await
            .unwrap();
        assert_eq!(rows[0].shopify_sales, dec("807"));
        assert_eq!(rows[0].amazon_sales, dec("100"));
        assert_eq!(rows[0].total_sales, dec("907"));
    }

    #[tokio::test]
    async fn merge_zero_on_missing_date_creates_nothing() {
        let (wh, merger, _, config) = setup(vec![]);
        let out = merger.merge(date(2), LedgerColumn::AmazonSales, BigDecimal::zero()).await.unwrap();
        assert!(out.is_none());
        let rows = wh
            .load_ledger(&config.ledger.table, "date", &DateWindow::single(date(2)))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn channels_sharing_a_column_are_summed() {
        let (wh, merger, registry, config) = setup(vec![
            channel("woo_us", LedgerColumn::WoocommerceSales),
            channel("woo_eu", LedgerColumn::WoocommerceSales),
        ]);
        wh.seed_sales("woo_us_daily_sales", vec![sales(1, "40")]);
        wh.seed_sales("woo_eu_daily_sales", vec![sales(1, "60")]);

        let report = merger.merge_window(&registry, &DateWindow::single(date(1))).await.unwrap();
        assert_eq!(report.dates_created, 1);

        let row = merger
            .merge_channel(&registry, date(1), "woo_us", dec("50"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.woocommerce_sales, dec("110"));
        assert_eq!(row.total_sales, dec("110"));

        let rows = wh
            .load_ledger(&config.ledger.table, "date", &DateWindow::single(date(1)))
            .await
            .unwrap();
        assert_eq!(rows[0].woocommerce_sales, dec("110"));
    }

    #[tokio::test]
    async fn merge_window_is_idempotent() {
        let (wh, merger, registry, _) = setup(vec![channel("shopify", LedgerColumn::ShopifySales)]);
        wh.seed_sales("shopify_daily_sales", vec![sales(1, "807"), sales(3, "10")]);
        let window = DateWindow::new(date(1), date(3)).unwrap();

        let first = merger.merge_window(&registry, &window).await.unwrap();
        assert_eq!((first.dates_created, first.dates_updated), (2, 0));

        let second = merger.merge_window(&registry, &window).await.unwrap();
        assert_eq!((second.dates_created, second.dates_updated, second.dates_unchanged), (0, 0, 2));
    }

    #[tokio::test]
    async fn emptied_channel_window_zeroes_existing_rows() {
        let (wh, merger, registry, config) = setup(vec![channel("amazon", LedgerColumn::AmazonSales)]);
        let mut seeded = MasterDailyRecord::empty(date(5), "USD");
        seeded.amazon_sales = dec("300");
        seeded.recompute_total();
        wh.seed_ledger(&config.ledger.table, vec![seeded]);

        let report = merger.merge_window(&registry, &DateWindow::single(date(5))).await.unwrap();
        assert_eq!(report.dates_updated, 1);

        let rows = wh
            .load_ledger(&config.ledger.table, "date", &DateWindow::single(date(5)))
            .await
            .unwrap();
        assert_eq!(rows[0].amazon_sales, BigDecimal::zero());
        assert_eq!(rows[0].total_sales, BigDecimal::zero());
    }

    #[tokio::test]
    async fn merge_channel_rejects_unknown_channel() {
        let (_, merger, registry, _) = setup(vec![]);
        let err = merger
            .merge_channel(&registry, date(1), "ebay", dec("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownChannel(_)));
    }
}
