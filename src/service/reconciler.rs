use bigdecimal::BigDecimal;
use chrono::{Local, NaiveDate};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::Warehouse;
use crate::error::ReconcileError;
use crate::models::{
    ChannelDailyTotal, DateWindow, FreshnessCheck, JobStatus, MasterDailyRecord, MergeReport,
    RebuildReport, RebuildTarget, SyncAllReport, SyncReport,
};
use crate::service::channel_sync::ChannelSync;
use crate::service::freshness::check_sources;
use crate::service::ledger_merge::LedgerMerger;
use crate::service::notifier::{FanoutNotifier, Notifier};
use crate::service::registry::ChannelRegistry;

/// 对账服务: 所有作业入口
///
/// 每个入口返回带 `status` 的结果; 只有配置类错误 (未知渠道, 凭证被拒绝,
/// 未知表) 以 `Err` 形式向上传播。
pub struct ReconcileService {
    config: Arc<AppConfig>,
    warehouse: Arc<dyn Warehouse>,
    registry: ChannelRegistry,
    sync: ChannelSync,
    merger: LedgerMerger,
    notifier: Arc<dyn Notifier>,
}

impl ReconcileService {
    pub fn new(config: AppConfig, warehouse: Arc<dyn Warehouse>) -> Self {
        let registry = ChannelRegistry::from_config(&config);
        let notifier = Arc::new(FanoutNotifier::from_report_dir(config.notify.report_dir.as_deref()));
        Self::with_parts(config, warehouse, registry, notifier)
    }

    pub fn with_parts(
        config: AppConfig,
        warehouse: Arc<dyn Warehouse>,
        registry: ChannelRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let sync = ChannelSync::new(warehouse.clone(), config.retry.clone());
        let merger = LedgerMerger::new(warehouse.clone(), config.ledger.clone());
        Self {
            config: Arc::new(config),
            warehouse,
            registry,
            sync,
            merger,
            notifier,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// 同步单个渠道窗口 (拉取 → 归一化 → 聚合 → 替换)
    /// 同一 (渠道, 窗口) 的并发调用须由调用方串行化
    pub async fn sync_channel(&self, channel: &str, window: &DateWindow) -> Result<SyncReport, ReconcileError> {
        let descriptor = self.registry.get(channel)?;
        self.sync.sync(descriptor, window).await
    }

    /// 所有渠道并发同步, 全部替换成功后合并一次账本
    pub async fn sync_all(&self, window: &DateWindow) -> Result<SyncAllReport, ReconcileError> {
        let start = Instant::now();
        info!("========== 全渠道同步 {} ({} 个渠道) ==========", window, self.registry.len());

        let results = join_all(self.registry.iter().map(|ch| self.sync.sync(ch, window))).await;
        let syncs = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let mut status = syncs
            .iter()
            .fold(JobStatus::Success, |acc, s| acc.worst(s.status));
        if !syncs.is_empty() && syncs.iter().all(|s| s.status == JobStatus::Error) {
            status = JobStatus::Error;
        } else if status == JobStatus::Error {
            status = JobStatus::PartialFailure;
        }

        let blocked: Vec<&str> = syncs
            .iter()
            .filter(|s| !s.safe_to_merge())
            .map(|s| s.channel.as_str())
            .collect();

        let merge = if blocked.is_empty() {
            let merge = self.merge_ledger(window).await?;
            status = status.worst(merge.status);
            Some(merge)
        } else {
            error!("渠道 {:?} 部分替换, 跳过账本合并 {}", blocked, window);
            status = JobStatus::Error;
            None
        };

        info!("========== 全渠道同步完成: {:?}, 耗时 {:?} ==========", status, start.elapsed());
        Ok(SyncAllReport {
            window: *window,
            status,
            syncs,
            merge,
        })
    }

    /// 从渠道表重算窗口内的主账本
    /// 数仓瞬时故障转为 status=error 的结果, 配置类错误向上传播
    pub async fn merge_ledger(&self, window: &DateWindow) -> Result<MergeReport, ReconcileError> {
        match self.merger.merge_window(&self.registry, window).await {
            Ok(report) => Ok(report),
            Err(ReconcileError::Warehouse(e)) if !e.is_configuration() => {
                warn!("账本合并失败 {}: {}", window, e);
                Ok(MergeReport {
                    window: *window,
                    status: JobStatus::Error,
                    message: format!("merge failed: {e}"),
                    dates_created: 0,
                    dates_updated: 0,
                    dates_unchanged: 0,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 单日单渠道合并 (绝对值)
    pub async fn merge(
        &self,
        date: NaiveDate,
        channel: &str,
        channel_revenue: BigDecimal,
    ) -> Result<Option<MasterDailyRecord>, ReconcileError> {
        self.merger.merge_channel(&self.registry, date, channel, channel_revenue).await
    }

    /// 渠道日收入汇总
    pub async fn roll_up(&self, channel: &str, window: &DateWindow) -> Result<Vec<ChannelDailyTotal>, ReconcileError> {
        let descriptor = self.registry.get(channel)?;
        Ok(self.sync.roll_up(descriptor, window).await?)
    }

    /// 重建派生表: 诊断自动修复与手动触发共用
    pub async fn rebuild(&self, target: &RebuildTarget, window: &DateWindow) -> Result<RebuildReport, ReconcileError> {
        info!("重建 {} {}", target, window);
        let report = match target {
            RebuildTarget::Ledger => {
                let merge = self.merge_ledger(window).await?;
                RebuildReport {
                    target: target.clone(),
                    window: *window,
                    status: merge.status,
                    message: merge.message.clone(),
                    sync: None,
                    merge: Some(merge),
                }
            }
            RebuildTarget::Channel(name) => {
                let sync = self.sync_channel(name, window).await?;
                // 替换未成功提交时不合并
                let merge = if sync.replace_committed() {
                    Some(self.merge_ledger(window).await?)
                } else {
                    None
                };
                let status = match &merge {
                    Some(m) => sync.status.worst(m.status),
                    None => JobStatus::Error,
                };
                let message = match &merge {
                    Some(m) => format!("{}; ledger: {}", sync.message, m.message),
                    None => format!("{}; ledger merge skipped", sync.message),
                };
                RebuildReport {
                    target: target.clone(),
                    window: *window,
                    status,
                    message,
                    sync: Some(sync),
                    merge,
                }
            }
        };
        info!("重建 {} 完成: {:?} {}", target, report.status, report.message);
        Ok(report)
    }

    pub async fn check_freshness(&self) -> Vec<FreshnessCheck> {
        self.check_freshness_at(Local::now().date_naive()).await
    }

    pub async fn check_freshness_at(&self, today: NaiveDate) -> Vec<FreshnessCheck> {
        check_sources(self.warehouse.as_ref(), &self.config.freshness, today).await
    }
}
