use bigdecimal::Zero;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::db::Warehouse;
use crate::error::{FetchError, ReconcileError, WarehouseError};
use crate::models::{
    ChannelDailyProductSales, ChannelDailyTotal, DateWindow, JobStatus, NormalizeStats, SyncReport,
};
use crate::service::aggregator::{aggregate_daily, total_revenue};
use crate::service::registry::ChannelDescriptor;
use crate::service::sources::fetch_all_orders;

/// 替换失败位置
#[derive(Debug)]
pub enum ReplaceFailure {
    /// 删除失败: 窗口内旧数据保持不变
    Delete(WarehouseError),
    /// 删除已提交, 插入失败: 窗口内数据为空
    Insert { deleted: u64, source: WarehouseError },
}

/// 渠道同步: 拉取 → 归一化 → 聚合 → 窗口整体替换
pub struct ChannelSync {
    warehouse: Arc<dyn Warehouse>,
    retry: RetryConfig,
}

impl ChannelSync {
    pub fn new(warehouse: Arc<dyn Warehouse>, retry: RetryConfig) -> Self {
        Self { warehouse, retry }
    }

    /// 同步单个渠道的一个日期窗口
    ///
    /// 拉取失败 (重试耗尽) 不改动渠道表; 凭证被拒绝直接向上返回。
    /// 删除已提交而插入失败时 `partial_replace = true`, 调用方不得继续合并账本。
    pub async fn sync(
        &self,
        channel: &ChannelDescriptor,
        window: &DateWindow,
    ) -> Result<SyncReport, ReconcileError> {
        let start = Instant::now();
        let name = channel.name();
        info!("[{}] 开始同步 {}", name, window);

        let orders = match fetch_all_orders(name, channel.source.as_ref(), window, &self.retry).await {
            Ok(orders) => orders,
            Err(e @ FetchError::Unauthorized { .. }) => {
                error!("[{}] 凭证被拒绝: {}", name, e);
                return Err(ReconcileError::Unauthorized {
                    channel: name.to_string(),
                    source: e,
                });
            }
            Err(e) => {
                warn!("[{}] 拉取失败, 渠道表保持不变: {}", name, e);
                let mut report = empty_report(name, window);
                report.status = JobStatus::Error;
                report.message = format!("fetch failed: {e}");
                return Ok(report);
            }
        };

        let (lines, stats) = channel.normalizer.normalize_batch(&orders);

        let aggregation = aggregate_daily(name, &lines, window);
        let revenue = total_revenue(&aggregation.rows);

        let mut report = SyncReport {
            channel: name.to_string(),
            window: *window,
            status: JobStatus::Success,
            message: String::new(),
            orders_fetched: orders.len(),
            normalize: stats,
            lines_outside_window: aggregation.outside_window,
            rows_deleted: 0,
            rows_inserted: 0,
            revenue,
            partial_replace: false,
        };

        match self.replace(channel, window, &aggregation.rows).await {
            Ok((deleted, inserted)) => {
                report.rows_deleted = deleted;
                report.rows_inserted = inserted;
                if report.normalize.lines_dropped > 0 {
                    report.status = JobStatus::PartialFailure;
                    report.message = format!(
                        "replaced {} rows, {} lines dropped",
                        inserted, report.normalize.lines_dropped
                    );
                } else {
                    report.message = format!("replaced {} rows", inserted);
                }
            }
            Err(ReplaceFailure::Delete(e)) => {
                warn!("[{}] 删除窗口失败, 渠道表保持不变: {}", name, e);
                report.status = JobStatus::Error;
                report.message = format!("delete failed: {e}");
            }
            Err(ReplaceFailure::Insert { deleted, source }) => {
                error!(
                    "[{}] ✗ 部分替换: 已删除 {} 行但插入失败, 窗口 {} 当前为空, 需要重建: {}",
                    name, deleted, window, source
                );
                report.rows_deleted = deleted;
                report.status = JobStatus::Error;
                report.partial_replace = true;
                report.message = format!("partial replace, window left empty: {source}");
            }
        }

        info!(
            "[{}] 同步完成: status={:?}, 订单 {}, 行 {}, 收入 {}, 耗时 {:?}",
            name,
            report.status,
            report.orders_fetched,
            report.rows_inserted,
            report.revenue,
            start.elapsed()
        );
        Ok(report)
    }

    /// 替换-写入: 先删除窗口内全部行, 再插入新聚合行
    /// 返回 (删除行数, 插入行数)
    pub async fn replace(
        &self,
        channel: &ChannelDescriptor,
        window: &DateWindow,
        rows: &[ChannelDailyProductSales],
    ) -> Result<(u64, u64), ReplaceFailure> {
        let deleted = self
            .warehouse
            .delete_window(channel.table(), channel.date_column(), window)
            .await
            .map_err(ReplaceFailure::Delete)?;

        if rows.is_empty() {
            return Ok((deleted, 0));
        }

        let inserted = self
            .warehouse
            .insert_sales(channel.table(), channel.date_column(), rows)
            .await
            .map_err(|source| ReplaceFailure::Insert { deleted, source })?;

        Ok((deleted, inserted))
    }

    /// 渠道日收入汇总: 按日期对 total_revenue 求和
    pub async fn roll_up(
        &self,
        channel: &ChannelDescriptor,
        window: &DateWindow,
    ) -> Result<Vec<ChannelDailyTotal>, WarehouseError> {
        let sums = self
            .warehouse
            .daily_sums(channel.table(), channel.date_column(), "total_revenue", window)
            .await?;
        Ok(sums
            .into_iter()
            .map(|(order_date, revenue)| ChannelDailyTotal {
                order_date,
                channel_name: channel.name().to_string(),
                revenue,
            })
            .collect())
    }
}

fn empty_report(channel: &str, window: &DateWindow) -> SyncReport {
    SyncReport {
        channel: channel.to_string(),
        window: *window,
        status: JobStatus::Success,
        message: String::new(),
        orders_fetched: 0,
        normalize: NormalizeStats::default(),
        lines_outside_window: 0,
        rows_deleted: 0,
        rows_inserted: 0,
        revenue: bigdecimal::BigDecimal::zero(),
        partial_replace: false,
    }
}
