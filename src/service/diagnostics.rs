use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{Duration, Local, NaiveDate, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{DerivedRule, DiagnosticsConfig};
use crate::error::ReconcileError;
use crate::models::{
    DateWindow, DiagnosticsReport, Fix, Issue, IssueType, JobStatus, RebuildTarget, RunStatus, Severity,
};
use crate::service::reconciler::ReconcileService;

/// 派生值相对权威值的偏差百分比
/// 权威值为 0 时: 派生值也为 0 视为无偏差, 否则视为 100%
pub fn divergence_pct(source: &BigDecimal, derived: &BigDecimal) -> f64 {
    if source.is_zero() {
        return if derived.is_zero() { 0.0 } else { 100.0 };
    }
    let diff = (derived - source).abs();
    (&diff * &BigDecimal::from(100) / source.abs())
        .to_f64()
        .unwrap_or(f64::MAX)
}

/// 检查计数
#[derive(Default)]
struct Tally {
    attempted: usize,
    failed: usize,
    errors: Vec<String>,
}

impl Tally {
    fn record<T>(&mut self, label: &str, result: Result<T, ReconcileError>) -> Option<T> {
        self.attempted += 1;
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.fail(label, e);
                None
            }
        }
    }

    fn fail(&mut self, label: &str, err: impl std::fmt::Display) {
        error!("检查失败 {}: {}", label, err);
        self.failed += 1;
        self.errors.push(format!("{label}: {err}"));
    }
}

/// 修复结果 (同一重建目标的所有问题共享)
struct FixOutcome {
    action: String,
    message: String,
    success: bool,
}

/// 一次诊断运行: 检查 → 自动修复 → 报告
pub struct Diagnostics<'a> {
    service: &'a ReconcileService,
    settings: &'a DiagnosticsConfig,
    today: NaiveDate,
    /// 偏差/可加性检查及修复的窗口
    window: DateWindow,
}

impl<'a> Diagnostics<'a> {
    pub fn new(service: &'a ReconcileService, today: NaiveDate) -> Self {
        Self {
            service,
            settings: &service.config().diagnostics,
            today,
            window: service.diagnostics_window(today),
        }
    }

    pub async fn run(&self) -> DiagnosticsReport {
        let started_at = Utc::now();
        let start = Instant::now();
        info!("========== 开始诊断 {} ==========", self.window);

        let mut tally = Tally::default();
        let mut issues = Vec::new();
        let rules = self.service.config().derived_rules();

        // 1. 派生表落后于源表
        for rule in &rules {
            let label = format!("stale check {}", rule.name);
            if let Some(Some(issue)) = tally.record(&label, self.check_stale(rule).await) {
                issues.push(issue);
            }
        }

        // 2. 派生汇总与权威汇总偏差
        for rule in &rules {
            let label = format!("drift check {}", rule.name);
            if let Some(Some(issue)) = tally.record(&label, self.check_drift(rule).await) {
                issues.push(issue);
            }
        }

        // 3. 数据源新鲜度 (只报告)
        for check in self.service.check_freshness_at(self.today).await {
            tally.attempted += 1;
            if let Some(e) = &check.error {
                tally.fail(&format!("freshness {}", check.source_id), e);
                continue;
            }
            if !check.is_fresh {
                let severity = if check.last_data_date.is_none() {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                issues.push(Issue {
                    issue_type: IssueType::StaleSource,
                    severity,
                    message: format!(
                        "{} is {} days old (threshold {})",
                        check.source_id, check.days_old, check.threshold_days
                    ),
                    detail: json!(check),
                    rebuild: Vec::new(),
                });
            }
        }

        // 4. 账本缺失日期 (只报告)
        if let Some(Some(issue)) = tally.record("missing dates", self.check_missing_dates().await) {
            issues.push(issue);
        }

        // 5. 账本可加性
        if let Some(Some(issue)) = tally.record("ledger additivity", self.check_additivity().await) {
            issues.push(issue);
        }

        let (fixes, healed) = if self.settings.auto_fix && !issues.is_empty() {
            self.apply_fixes(&issues).await
        } else {
            (Vec::new(), false)
        };

        let status = if tally.attempted > 0 && tally.failed == tally.attempted {
            RunStatus::FatalError
        } else if tally.failed > 0 {
            RunStatus::Error
        } else if issues.is_empty() {
            RunStatus::Healthy
        } else if healed {
            RunStatus::Healed
        } else {
            RunStatus::IssuesDetected
        };

        let report = DiagnosticsReport {
            status,
            issues_found: issues.len(),
            fixes_applied: fixes.iter().filter(|f| f.success).count(),
            errors: tally.errors,
            issues,
            fixes,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "========== 诊断完成: {:?}, 问题 {}, 修复 {}, 耗时 {:?} ==========",
            report.status,
            report.issues_found,
            report.fixes_applied,
            start.elapsed()
        );
        report
    }

    async fn source_max_date(&self, rule: &DerivedRule) -> Result<Option<NaiveDate>, ReconcileError> {
        let mut latest = None;
        for src in &rule.source_tables {
            let max = self
                .service
                .warehouse()
                .max_date(&src.table, &src.date_column)
                .await?;
            latest = latest.max(max);
        }
        Ok(latest)
    }

    async fn check_stale(&self, rule: &DerivedRule) -> Result<Option<Issue>, ReconcileError> {
        let Some(source_max) = self.source_max_date(rule).await? else {
            return Ok(None);
        };
        let derived_max = self
            .service
            .warehouse()
            .max_date(&rule.derived_table, &rule.derived_date_column)
            .await?;

        let lag_days = derived_max.map(|d| (source_max - d).num_days());
        let stale = match lag_days {
            Some(lag) => lag > self.settings.stale_lag_days,
            None => true,
        };
        if !stale {
            return Ok(None);
        }

        warn!("{}: 派生表最新 {:?}, 源表最新 {}", rule.name, derived_max, source_max);
        Ok(Some(Issue {
            issue_type: IssueType::StaleDerivedTable,
            severity: Severity::Warning,
            message: format!(
                "{} latest date {} lags source latest {}",
                rule.derived_table,
                derived_max.map(|d| d.to_string()).unwrap_or_else(|| "none".into()),
                source_max
            ),
            detail: json!({
                "rule": rule.name,
                "derived_table": rule.derived_table,
                "derived_max_date": derived_max,
                "source_tables": rule.source_tables,
                "source_max_date": source_max,
                "lag_days": lag_days,
            }),
            rebuild: vec![rule.rebuild.clone()],
        }))
    }

    async fn check_drift(&self, rule: &DerivedRule) -> Result<Option<Issue>, ReconcileError> {
        let warehouse = self.service.warehouse();
        let mut source_daily: BTreeMap<NaiveDate, BigDecimal> = BTreeMap::new();
        for src in &rule.source_tables {
            let sums = warehouse
                .daily_sums(&src.table, &src.date_column, &rule.source_column, &self.window)
                .await?;
            for (day, value) in sums {
                *source_daily.entry(day).or_insert_with(BigDecimal::zero) += value;
            }
        }
        let derived_daily = warehouse
            .daily_sums(&rule.derived_table, &rule.derived_date_column, &rule.derived_column, &self.window)
            .await?;

        let source_total = source_daily.values().fold(BigDecimal::zero(), |acc, v| acc + v);
        let derived_total = derived_daily.iter().fold(BigDecimal::zero(), |acc, (_, v)| acc + v);

        let pct = divergence_pct(&source_total, &derived_total);
        if pct <= self.settings.drift_threshold_pct {
            return Ok(None);
        }

        // 派生值高于源表的日期: 源表可能被部分替换清空, 只重合并账本会抹掉真实收入
        let zero = BigDecimal::zero();
        let under_reported: Vec<NaiveDate> = derived_daily
            .iter()
            .filter(|(day, value)| *value > *source_daily.get(day).unwrap_or(&zero))
            .map(|(day, _)| *day)
            .collect();
        let rebuild = if under_reported.is_empty() {
            vec![rule.rebuild.clone()]
        } else {
            self.resync_targets(rule)
        };

        let severity = if pct > self.settings.critical_threshold_pct {
            Severity::Critical
        } else {
            Severity::Warning
        };
        warn!(
            "{}: 派生 {} vs 源 {} 偏差 {:.2}% ({:?})",
            rule.name, derived_total, source_total, pct, severity
        );
        Ok(Some(Issue {
            issue_type: IssueType::AggregateDrift,
            severity,
            message: format!(
                "{}: derived {} vs source {} ({:.2}% divergence)",
                rule.name, derived_total, source_total, pct
            ),
            detail: json!({
                "rule": rule.name,
                "derived_table": rule.derived_table,
                "derived_column": rule.derived_column,
                "source_tables": rule.source_tables,
                "source_total": source_total.to_string(),
                "derived_total": derived_total.to_string(),
                "divergence_pct": pct,
                "under_reported_dates": under_reported,
                "window": self.window,
            }),
            rebuild,
        }))
    }

    /// 源表对应的渠道重新拉取; 有源表不属于任何渠道时只报告
    fn resync_targets(&self, rule: &DerivedRule) -> Vec<RebuildTarget> {
        let registry = self.service.registry();
        let mut targets = Vec::new();
        for src in &rule.source_tables {
            match registry.iter().find(|c| c.table() == src.table) {
                Some(channel) => targets.push(RebuildTarget::Channel(channel.name().to_string())),
                None => {
                    warn!("{}: 源表 {} 没有对应渠道, 无法重新拉取, 只报告偏差", rule.name, src.table);
                    return Vec::new();
                }
            }
        }
        targets
    }

    async fn check_missing_dates(&self) -> Result<Option<Issue>, ReconcileError> {
        let ledger = &self.service.config().ledger;
        // 当天数据可能尚未到齐, 从昨天往前数
        let window = DateWindow::trailing(self.today - Duration::days(1), self.settings.missing_dates_days);
        let present = self
            .service
            .warehouse()
            .distinct_dates(&ledger.table, &ledger.date_column, &window)
            .await?;

        let missing: Vec<NaiveDate> = window.days().filter(|d| !present.contains(d)).collect();
        if missing.is_empty() {
            return Ok(None);
        }

        Ok(Some(Issue {
            issue_type: IssueType::MissingDates,
            severity: Severity::Warning,
            message: format!("{} missing {} of {} dates in {}", ledger.table, missing.len(), window.len_days(), window),
            detail: json!({ "table": ledger.table, "window": window, "missing": missing }),
            rebuild: Vec::new(),
        }))
    }

    async fn check_additivity(&self) -> Result<Option<Issue>, ReconcileError> {
        let ledger = &self.service.config().ledger;
        let rows = self
            .service
            .warehouse()
            .load_ledger(&ledger.table, &ledger.date_column, &self.window)
            .await?;

        let broken: Vec<NaiveDate> = rows.iter().filter(|r| !r.is_additive()).map(|r| r.date).collect();
        if broken.is_empty() {
            return Ok(None);
        }

        Ok(Some(Issue {
            issue_type: IssueType::LedgerNotAdditive,
            severity: Severity::Critical,
            message: format!("{} rows where total_sales != sum of channel columns", broken.len()),
            detail: json!({ "table": ledger.table, "dates": broken }),
            rebuild: vec![RebuildTarget::Ledger],
        }))
    }

    /// 每个重建目标只执行一次: 先重新拉取渠道, 全部成功后再合并账本
    async fn apply_fixes(&self, issues: &[Issue]) -> (Vec<Fix>, bool) {
        let mut channels: Vec<&str> = Vec::new();
        let mut ledger = false;
        for target in issues.iter().flat_map(|i| &i.rebuild) {
            match target {
                RebuildTarget::Channel(name) if !channels.contains(&name.as_str()) => channels.push(name.as_str()),
                RebuildTarget::Channel(_) => {}
                RebuildTarget::Ledger => ledger = true,
            }
        }

        let mut outcomes: HashMap<RebuildTarget, FixOutcome> = HashMap::new();
        let mut channels_ok = true;
        for name in &channels {
            let outcome = self.resync_channel(name).await;
            channels_ok &= outcome.success;
            outcomes.insert(RebuildTarget::Channel(name.to_string()), outcome);
        }

        if ledger || !channels.is_empty() {
            let outcome = if channels_ok {
                self.rebuild_ledger().await
            } else {
                warn!("渠道重新拉取失败, 跳过账本合并");
                FixOutcome {
                    action: format!("rebuild {} {}", RebuildTarget::Ledger, self.window),
                    message: "skipped: channel resync failed".to_string(),
                    success: false,
                }
            };
            outcomes.insert(RebuildTarget::Ledger, outcome);
        }

        let mut fixes = Vec::new();
        let mut healed = true;
        for issue in issues {
            let targets = effective_targets(issue);
            healed &= !targets.is_empty();
            for target in &targets {
                let Some(outcome) = outcomes.get(target) else {
                    healed = false;
                    continue;
                };
                healed &= outcome.success;
                fixes.push(Fix {
                    issue_type: issue.issue_type,
                    action: outcome.action.clone(),
                    message: outcome.message.clone(),
                    success: outcome.success,
                });
            }
        }

        (fixes, healed)
    }

    async fn resync_channel(&self, name: &str) -> FixOutcome {
        let action = format!("rebuild {} {}", RebuildTarget::Channel(name.to_string()), self.window);
        match self.service.sync_channel(name, &self.window).await {
            Ok(report) => FixOutcome {
                action,
                success: report.replace_committed(),
                message: report.message,
            },
            Err(e) => {
                error!("自动修复失败 channel:{}: {}", name, e);
                FixOutcome {
                    action,
                    message: e.to_string(),
                    success: false,
                }
            }
        }
    }

    async fn rebuild_ledger(&self) -> FixOutcome {
        let action = format!("rebuild {} {}", RebuildTarget::Ledger, self.window);
        match self.service.rebuild(&RebuildTarget::Ledger, &self.window).await {
            Ok(report) => FixOutcome {
                action,
                success: report.status != JobStatus::Error,
                message: report.message,
            },
            Err(e) => {
                error!("自动修复失败 ledger: {}", e);
                FixOutcome {
                    action,
                    message: e.to_string(),
                    success: false,
                }
            }
        }
    }
}

/// 渠道重新拉取之后总要再合并账本
fn effective_targets(issue: &Issue) -> Vec<RebuildTarget> {
    let mut targets = issue.rebuild.clone();
    let has_channel = targets.iter().any(|t| matches!(t, RebuildTarget::Channel(_)));
    if has_channel && !targets.contains(&RebuildTarget::Ledger) {
        targets.push(RebuildTarget::Ledger);
    }
    targets
}

impl ReconcileService {
    /// 诊断检查及自动修复覆盖的窗口
    pub fn diagnostics_window(&self, today: NaiveDate) -> DateWindow {
        DateWindow::trailing(today, self.config().diagnostics.lookback_days)
    }

    /// 运行一次诊断并投递报告
    pub async fn run_diagnostics(&self) -> DiagnosticsReport {
        self.run_diagnostics_at(Local::now().date_naive()).await
    }

    pub async fn run_diagnostics_at(&self, today: NaiveDate) -> DiagnosticsReport {
        let report = Diagnostics::new(self, today).run().await;
        if let Err(e) = self.notifier().notify(&report).await {
            warn!("诊断报告投递失败 (不影响诊断结果): {}", e);
        }
        report
    }
}
