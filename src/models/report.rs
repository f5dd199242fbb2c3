use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{DateWindow, NormalizeStats};

/// 作业结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    PartialFailure,
    Error,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    /// 两个状态中更差的一个
    pub fn worst(self, other: JobStatus) -> JobStatus {
        fn rank(s: JobStatus) -> u8 {
            match s {
                JobStatus::Success => 0,
                JobStatus::PartialFailure => 1,
                JobStatus::Error => 2,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

/// sync_channel 结果
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub channel: String,
    pub window: DateWindow,
    pub status: JobStatus,
    pub message: String,
    pub orders_fetched: usize,
    pub normalize: NormalizeStats,
    /// 落在窗口外被忽略的行
    pub lines_outside_window: usize,
    pub rows_deleted: u64,
    pub rows_inserted: u64,
    pub revenue: BigDecimal,
    /// 删除成功但插入失败, 窗口数据为空
    pub partial_replace: bool,
}

impl SyncReport {
    /// 替换是否完整提交 (可以继续合并账本)
    pub fn replace_committed(&self) -> bool {
        !self.partial_replace && self.status != JobStatus::Error
    }

    /// 渠道表处于一致状态 (新数据或未改动的旧数据)
    pub fn safe_to_merge(&self) -> bool {
        !self.partial_replace
    }
}

/// sync_all 结果: 各渠道同步 + 一次账本合并
#[derive(Debug, Clone, Serialize)]
pub struct SyncAllReport {
    pub window: DateWindow,
    pub status: JobStatus,
    pub syncs: Vec<SyncReport>,
    pub merge: Option<MergeReport>,
}

/// merge_ledger 结果
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub window: DateWindow,
    pub status: JobStatus,
    pub message: String,
    pub dates_created: usize,
    pub dates_updated: usize,
    pub dates_unchanged: usize,
}

/// 重建目标
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "channel")]
pub enum RebuildTarget {
    /// 从渠道表重新合并账本
    Ledger,
    /// 从供应商源重新同步渠道表, 然后合并账本
    Channel(String),
}

impl fmt::Display for RebuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildTarget::Ledger => f.write_str("ledger"),
            RebuildTarget::Channel(name) => write!(f, "channel:{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub target: RebuildTarget,
    pub window: DateWindow,
    pub status: JobStatus,
    pub message: String,
    pub sync: Option<SyncReport>,
    pub merge: Option<MergeReport>,
}

/// 新鲜度检查结果 (不落库)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessCheck {
    pub source_id: String,
    pub last_data_date: Option<NaiveDate>,
    pub days_old: i64,
    pub threshold_days: i64,
    pub is_fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    StaleDerivedTable,
    AggregateDrift,
    StaleSource,
    MissingDates,
    LedgerNotAdditive,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueType::StaleDerivedTable => "stale_derived_table",
            IssueType::AggregateDrift => "aggregate_drift",
            IssueType::StaleSource => "stale_source",
            IssueType::MissingDates => "missing_dates",
            IssueType::LedgerNotAdditive => "ledger_not_additive",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: String,
    pub detail: serde_json::Value,
    /// 自动修复的重建目标, 为空时只报告
    #[serde(skip)]
    pub rebuild: Vec<RebuildTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fix {
    pub issue_type: IssueType,
    pub action: String,
    pub message: String,
    pub success: bool,
}

/// 诊断运行终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Healthy,
    IssuesDetected,
    Healed,
    Error,
    FatalError,
}

/// 诊断报告 (与通知方的唯一契约)
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub status: RunStatus,
    pub issues_found: usize,
    pub fixes_applied: usize,
    pub errors: Vec<String>,
    pub issues: Vec<Issue>,
    pub fixes: Vec<Fix>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
