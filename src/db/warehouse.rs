use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::error::WarehouseError;
use crate::models::{ChannelDailyProductSales, DateWindow, MasterDailyRecord};

/// 分析型数仓抽象
///
/// 只允许以下操作:
/// * 按日期区间删除
/// * 批量插入
/// * 按主键 upsert (匹配则更新, 否则插入)
/// * 聚合查询 (SUM / MAX / DISTINCT)
///
/// 单个窗口的 delete + insert 不保证原子性, 调用方负责同渠道同窗口串行。
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// DELETE FROM table WHERE date_column BETWEEN start AND end
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<u64, WarehouseError>;

    /// 批量插入渠道汇总行
    async fn insert_sales(
        &self,
        table: &str,
        date_column: &str,
        rows: &[ChannelDailyProductSales],
    ) -> Result<u64, WarehouseError>;

    /// 读取窗口内的渠道汇总行, 按主键排序
    async fn load_sales(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<ChannelDailyProductSales>, WarehouseError>;

    /// SELECT date, SUM(value) ... GROUP BY date
    async fn daily_sums(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<(NaiveDate, BigDecimal)>, WarehouseError>;

    /// 账本按日期 upsert
    async fn upsert_ledger(
        &self,
        table: &str,
        date_column: &str,
        rows: &[MasterDailyRecord],
    ) -> Result<u64, WarehouseError>;

    async fn load_ledger(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<MasterDailyRecord>, WarehouseError>;

    /// SELECT MAX(date_column), 空表返回 None
    async fn max_date(&self, table: &str, date_column: &str) -> Result<Option<NaiveDate>, WarehouseError>;

    /// SELECT COALESCE(SUM(value_column), 0) WHERE date_column BETWEEN ...
    async fn sum_column(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<BigDecimal, WarehouseError>;

    /// SELECT DISTINCT date_column WHERE ... ORDER BY 1
    async fn distinct_dates(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<NaiveDate>, WarehouseError>;
}

/// 校验表名/列名, 防止拼接进 SQL 时注入
/// 允许 schema.table 形式
pub fn check_identifier(ident: &str) -> Result<(), WarehouseError> {
    let valid = !ident.is_empty()
        && ident.len() <= 128
        && ident.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(WarehouseError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(check_identifier("shopify_daily_product_sales").is_ok());
        assert!(check_identifier("analytics.master_daily_sales").is_ok());
        assert!(check_identifier("_t1").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("1table").is_err());
        assert!(check_identifier("t; drop table x").is_err());
        assert!(check_identifier("a..b").is_err());
    }
}
