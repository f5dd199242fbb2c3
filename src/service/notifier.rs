use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::NotifyError;
use crate::models::{DiagnosticsReport, RunStatus};

/// 诊断报告投递
/// 投递失败只记录日志, 不改变诊断结果
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &DiagnosticsReport) -> Result<(), NotifyError>;
}

/// 只写日志
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &DiagnosticsReport) -> Result<(), NotifyError> {
        let summary = format!(
            "诊断结果: {:?}, 问题 {}, 修复 {}, 错误 {}",
            report.status,
            report.issues_found,
            report.fixes_applied,
            report.errors.len()
        );
        match report.status {
            RunStatus::Healthy | RunStatus::Healed => info!("{}", summary),
            _ => warn!("{}", summary),
        }
        for issue in &report.issues {
            info!("  [{:?}] {}: {}", issue.severity, issue.issue_type, issue.message);
        }
        for err in &report.errors {
            warn!("  error: {}", err);
        }
        Ok(())
    }
}

/// 写入报告目录: diagnostics-<时间>.json + diagnostics-<时间>.csv
#[derive(Debug)]
pub struct FileNotifier {
    dir: PathBuf,
}

impl FileNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stem(report: &DiagnosticsReport) -> String {
        format!("diagnostics-{}", report.finished_at.format("%Y%m%dT%H%M%S"))
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn notify(&self, report: &DiagnosticsReport) -> Result<(), NotifyError> {
        std::fs::create_dir_all(&self.dir)?;
        let stem = Self::stem(report);

        let json_path = self.dir.join(format!("{stem}.json"));
        let file = File::create(&json_path)?;
        serde_json::to_writer_pretty(file, report)?;

        let csv_path = self.dir.join(format!("{stem}.csv"));
        export_to_csv(report, &csv_path)?;

        info!("诊断报告已写入 {:?}", json_path);
        Ok(())
    }
}

/// 导出问题与修复明细到 CSV
/// 列: kind, type, severity, message, success
pub fn export_to_csv(report: &DiagnosticsReport, output_path: &Path) -> Result<(), NotifyError> {
    use csv::Writer;

    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(["kind", "type", "severity", "message", "success"])?;

    for issue in &report.issues {
        writer.write_record([
            "issue".to_string(),
            issue.issue_type.to_string(),
            format!("{:?}", issue.severity).to_lowercase(),
            issue.message.clone(),
            String::new(),
        ])?;
    }
    for fix in &report.fixes {
        writer.write_record([
            "fix".to_string(),
            fix.issue_type.to_string(),
            String::new(),
            format!("{}: {}", fix.action, fix.message),
            fix.success.to_string(),
        ])?;
    }
    for err in &report.errors {
        writer.write_record(["error", "", "", err.as_str(), ""])?;
    }

    writer.flush()?;
    Ok(())
}

/// 依次投递到多个通知方, 单个失败不影响其它
pub struct FanoutNotifier {
    targets: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Box<dyn Notifier>>) -> Self {
        Self { targets }
    }

    pub fn from_report_dir(report_dir: Option<&str>) -> Self {
        let mut targets: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if let Some(dir) = report_dir {
            targets.push(Box::new(FileNotifier::new(dir)));
        }
        Self::new(targets)
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, report: &DiagnosticsReport) -> Result<(), NotifyError> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.notify(report).await {
                warn!("通知投递失败: {}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fix, Issue, IssueType, Severity};
    use chrono::Utc;

    fn report() -> DiagnosticsReport {
        DiagnosticsReport {
            status: RunStatus::Healed,
            issues_found: 1,
            fixes_applied: 1,
            errors: vec![],
            issues: vec![Issue {
                issue_type: IssueType::AggregateDrift,
                severity: Severity::Warning,
                message: "ledger.amazon_sales drifted 15.00%".into(),
                detail: serde_json::json!({"divergence_pct": 15.0}),
                rebuild: Vec::new(),
            }],
            fixes: vec![Fix {
                issue_type: IssueType::AggregateDrift,
                action: "rebuild ledger".into(),
                message: "1 updated".into(),
                success: true,
            }],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn file_notifier_writes_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = FileNotifier::new(dir.path().join("reports"));
        notifier.notify(&report()).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with(".csv"));
        assert!(names[1].ends_with(".json"));

        let json: serde_json::Value =
            serde_json::from_reader(File::open(dir.path().join("reports").join(&names[1])).unwrap()).unwrap();
        assert_eq!(json["status"], "healed");
        assert_eq!(json["issues"][0]["type"], "aggregate_drift");

        let mut rdr = csv::Reader::from_path(dir.path().join("reports").join(&names[0])).unwrap();
        assert_eq!(rdr.records().count(), 2);
    }

    #[tokio::test]
    async fn fanout_reports_failure_but_runs_every_target() {
        let dir = tempfile::tempdir().unwrap();
        // 目录路径被普通文件占用, 创建目录失败
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"x").unwrap();

        let notifier = FanoutNotifier::from_report_dir(blocked.to_str());
        assert!(notifier.notify(&report()).await.is_err());
    }
}
