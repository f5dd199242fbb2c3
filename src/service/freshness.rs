use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{info, warn};

use crate::config::FreshnessSource;
use crate::db::Warehouse;
use crate::models::FreshnessCheck;

/// 表为空时的 days_old 哨兵值
pub const NO_DATA_DAYS_OLD: i64 = 999;

/// 按最新日期判定新鲜度: days_old <= threshold 即新鲜, 空表永远过期
pub fn classify(source: &FreshnessSource, last_data_date: Option<NaiveDate>, today: NaiveDate) -> FreshnessCheck {
    let (days_old, is_fresh) = match last_data_date {
        Some(last) => {
            let days_old = (today - last).num_days();
            (days_old, days_old <= source.threshold_days)
        }
        None => (NO_DATA_DAYS_OLD, false),
    };
    FreshnessCheck {
        source_id: source.table_id.clone(),
        last_data_date,
        days_old,
        threshold_days: source.threshold_days,
        is_fresh,
        error: None,
    }
}

/// 检查全部监控源, 单个源查询失败记录在其结果中, 不影响其它源
pub async fn check_sources(
    warehouse: &dyn Warehouse,
    sources: &[FreshnessSource],
    today: NaiveDate,
) -> Vec<FreshnessCheck> {
    let checks = sources.iter().map(|source| async move {
        match warehouse.max_date(&source.table_id, &source.date_column).await {
            Ok(last) => {
                let check = classify(source, last, today);
                if !check.is_fresh {
                    warn!(
                        "数据源 {} 已过期: 最新 {:?}, {} 天 (阈值 {})",
                        check.source_id, check.last_data_date, check.days_old, check.threshold_days
                    );
                }
                check
            }
            Err(e) => {
                warn!("数据源 {} 新鲜度查询失败: {}", source.table_id, e);
                FreshnessCheck {
                    source_id: source.table_id.clone(),
                    last_data_date: None,
                    days_old: NO_DATA_DAYS_OLD,
                    threshold_days: source.threshold_days,
                    is_fresh: false,
                    error: Some(e.to_string()),
                }
            }
        }
    });

    let results = join_all(checks).await;
    let fresh = results.iter().filter(|c| c.is_fresh).count();
    info!("新鲜度检查完成: {}/{} 新鲜", fresh, results.len());
    results
}
