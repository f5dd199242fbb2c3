use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::config::AppConfig;
use crate::db::{check_identifier, Warehouse};
use crate::error::WarehouseError;
use crate::models::{ChannelDailyProductSales, DateWindow, MasterDailyRecord};

const DEFAULT_SALES_DATE_COLUMN: &str = "order_date";
const DEFAULT_LEDGER_DATE_COLUMN: &str = "date";

#[derive(Debug, Clone)]
enum Rows {
    Sales(Vec<ChannelDailyProductSales>),
    Ledger(BTreeMap<NaiveDate, MasterDailyRecord>),
}

/// 内存表: 行 + 建表时的日期列名
#[derive(Debug, Clone)]
struct MemTable {
    date_column: String,
    rows: Rows,
}

impl MemTable {
    fn sales(date_column: &str) -> Self {
        Self {
            date_column: date_column.to_string(),
            rows: Rows::Sales(Vec::new()),
        }
    }

    fn ledger(date_column: &str) -> Self {
        Self {
            date_column: date_column.to_string(),
            rows: Rows::Ledger(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemTable>,
    failing_inserts: HashSet<String>,
    failing_queries: HashSet<String>,
}

/// 内存数仓: 用于测试和 dry-run
/// 支持按表注入写入/查询失败
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置预建账本表和渠道表
    pub fn for_config(config: &AppConfig) -> Self {
        let wh = Self::new();
        {
            let mut state = wh.lock();
            state
                .tables
                .insert(config.ledger.table.clone(), MemTable::ledger(&config.ledger.date_column));
            for ch in &config.channels {
                state.tables.insert(ch.table.clone(), MemTable::sales(&ch.date_column));
            }
        }
        wh
    }

    /// 之后对该表的 insert/upsert 全部失败
    pub fn fail_inserts(&self, table: &str, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.failing_inserts.insert(table.to_string());
        } else {
            state.failing_inserts.remove(table);
        }
    }

    /// 之后对该表的读取/聚合全部失败
    pub fn fail_queries(&self, table: &str, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.failing_queries.insert(table.to_string());
        } else {
            state.failing_queries.remove(table);
        }
    }

    /// 直接写入账本行, 不做任何校验 (模拟历史脏数据)
    pub fn seed_ledger(&self, table: &str, rows: Vec<MasterDailyRecord>) {
        let mut state = self.lock();
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::ledger(DEFAULT_LEDGER_DATE_COLUMN));
        if let Rows::Ledger(map) = &mut entry.rows {
            for row in rows {
                map.insert(row.date, row);
            }
        }
    }

    pub fn seed_sales(&self, table: &str, rows: Vec<ChannelDailyProductSales>) {
        let mut state = self.lock();
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::sales(DEFAULT_SALES_DATE_COLUMN));
        if let Rows::Sales(existing) = &mut entry.rows {
            existing.extend(rows);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn check_query(&self, table: &str, date_column: &str) -> Result<&Rows, WarehouseError> {
        check_identifier(table)?;
        check_identifier(date_column)?;
        if self.failing_queries.contains(table) {
            return Err(WarehouseError::Injected(format!("query on {table}")));
        }
        let mem = self
            .tables
            .get(table)
            .ok_or_else(|| WarehouseError::UnknownTable(table.to_string()))?;
        check_date_column(table, mem, date_column)?;
        Ok(&mem.rows)
    }

    fn check_write(&self, table: &str) -> Result<(), WarehouseError> {
        check_identifier(table)?;
        if self.failing_inserts.contains(table) {
            return Err(WarehouseError::Injected(format!("write on {table}")));
        }
        Ok(())
    }

    /// 表内每行的 (日期, 数值) 投影
    fn project(
        &self,
        table: &str,
        date_column: &str,
        value_column: Option<&str>,
    ) -> Result<Vec<(NaiveDate, BigDecimal)>, WarehouseError> {
        let unknown_column = |column: &str| WarehouseError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        };

        match self.check_query(table, date_column)? {
            Rows::Sales(rows) => rows
                .iter()
                .map(|r| {
                    let value = match value_column {
                        Some(col) => r.numeric_column(col).ok_or_else(|| unknown_column(col))?,
                        None => BigDecimal::zero(),
                    };
                    Ok((r.order_date, value))
                })
                .collect(),
            Rows::Ledger(rows) => rows
                .values()
                .map(|r| {
                    let value = match value_column {
                        Some(col) => r.numeric_column(col).ok_or_else(|| unknown_column(col))?,
                        None => BigDecimal::zero(),
                    };
                    Ok((r.date, value))
                })
                .collect(),
        }
    }
}

fn check_date_column(table: &str, mem: &MemTable, date_column: &str) -> Result<(), WarehouseError> {
    if mem.date_column != date_column {
        return Err(WarehouseError::UnknownColumn {
            table: table.to_string(),
            column: date_column.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<u64, WarehouseError> {
        check_identifier(date_column)?;
        let mut state = self.lock();
        check_identifier(table)?;
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::sales(date_column));
        check_date_column(table, entry, date_column)?;
        let deleted = match &mut entry.rows {
            Rows::Sales(rows) => {
                let before = rows.len();
                rows.retain(|r| !window.contains(r.order_date));
                before - rows.len()
            }
            Rows::Ledger(map) => {
                let before = map.len();
                map.retain(|d, _| !window.contains(*d));
                before - map.len()
            }
        };
        Ok(deleted as u64)
    }

    async fn insert_sales(
        &self,
        table: &str,
        date_column: &str,
        rows: &[ChannelDailyProductSales],
    ) -> Result<u64, WarehouseError> {
        check_identifier(date_column)?;
        let mut state = self.lock();
        state.check_write(table)?;
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::sales(date_column));
        check_date_column(table, entry, date_column)?;
        match &mut entry.rows {
            Rows::Sales(existing) => {
                existing.extend(rows.iter().cloned());
                Ok(rows.len() as u64)
            }
            Rows::Ledger(_) => Err(WarehouseError::UnknownTable(format!("{table} is not a sales table"))),
        }
    }

    async fn load_sales(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<ChannelDailyProductSales>, WarehouseError> {
        let state = self.lock();
        match state.check_query(table, date_column)? {
            Rows::Sales(rows) => {
                let mut out: Vec<_> = rows.iter().filter(|r| window.contains(r.order_date)).cloned().collect();
                out.sort_by(|a, b| a.key().cmp(&b.key()));
                Ok(out)
            }
            Rows::Ledger(_) => Err(WarehouseError::UnknownTable(format!("{table} is not a sales table"))),
        }
    }

    async fn daily_sums(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<(NaiveDate, BigDecimal)>, WarehouseError> {
        let state = self.lock();
        let mut sums: BTreeMap<NaiveDate, BigDecimal> = BTreeMap::new();
        for (date, value) in state.project(table, date_column, Some(value_column))? {
            if window.contains(date) {
                *sums.entry(date).or_insert_with(BigDecimal::zero) += value;
            }
        }
        Ok(sums.into_iter().collect())
    }

    async fn upsert_ledger(
        &self,
        table: &str,
        date_column: &str,
        rows: &[MasterDailyRecord],
    ) -> Result<u64, WarehouseError> {
        check_identifier(date_column)?;
        let mut state = self.lock();
        state.check_write(table)?;
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::ledger(date_column));
        check_date_column(table, entry, date_column)?;
        match &mut entry.rows {
            Rows::Ledger(map) => {
                for row in rows {
                    map.insert(row.date, row.clone());
                }
                Ok(rows.len() as u64)
            }
            Rows::Sales(_) => Err(WarehouseError::UnknownTable(format!("{table} is not a ledger table"))),
        }
    }

    async fn load_ledger(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<MasterDailyRecord>, WarehouseError> {
        let state = self.lock();
        match state.check_query(table, date_column)? {
            Rows::Ledger(map) => Ok(map
                .range(window.start()..=window.end())
                .map(|(_, r)| r.clone())
                .collect()),
            Rows::Sales(_) => Err(WarehouseError::UnknownTable(format!("{table} is not a ledger table"))),
        }
    }

    async fn max_date(&self, table: &str, date_column: &str) -> Result<Option<NaiveDate>, WarehouseError> {
        let state = self.lock();
        Ok(state.project(table, date_column, None)?.into_iter().map(|(d, _)| d).max())
    }

    async fn sum_column(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<BigDecimal, WarehouseError> {
        let state = self.lock();
        Ok(state
            .project(table, date_column, Some(value_column))?
            .into_iter()
            .filter(|(d, _)| window.contains(*d))
            .fold(BigDecimal::zero(), |acc, (_, v)| acc + v))
    }

    async fn distinct_dates(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<NaiveDate>, WarehouseError> {
        let state = self.lock();
        let dates: BTreeSet<NaiveDate> = state
            .project(table, date_column, None)?
            .into_iter()
            .map(|(d, _)| d)
            .filter(|d| window.contains(*d))
            .collect();
        Ok(dates.into_iter().collect())
    }
}
