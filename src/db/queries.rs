use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::db::{check_identifier, Warehouse};
use crate::error::WarehouseError;
use crate::models::{ChannelDailyProductSales, DateWindow, MasterDailyRecord};

/// 单条语句最大批量行数
const INSERT_CHUNK: usize = 1000;

/// PostgreSQL 数仓实现
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self { pool, statement_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 建表 (账本 + 所有注册渠道表)
    pub async fn ensure_schema(&self, config: &AppConfig) -> Result<(), WarehouseError> {
        let ledger = &config.ledger;
        check_identifier(&ledger.table)?;
        check_identifier(&ledger.date_column)?;
        let ledger_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {date_col} DATE PRIMARY KEY,
                amazon_sales NUMERIC(18, 2) NOT NULL DEFAULT 0,
                woocommerce_sales NUMERIC(18, 2) NOT NULL DEFAULT 0,
                shopify_sales NUMERIC(18, 2) NOT NULL DEFAULT 0,
                total_sales NUMERIC(18, 2) NOT NULL DEFAULT 0,
                currency VARCHAR(8) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            table = ledger.table,
            date_col = ledger.date_column,
        );
        sqlx::query(&ledger_sql).execute(&self.pool).await?;

        for ch in &config.channels {
            check_identifier(&ch.table)?;
            check_identifier(&ch.date_column)?;
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    {date_col} DATE NOT NULL,
                    product_id BIGINT NOT NULL,
                    sku VARCHAR(128) NOT NULL,
                    product_name TEXT NOT NULL DEFAULT '',
                    total_quantity_sold BIGINT NOT NULL,
                    avg_unit_price NUMERIC(18, 2) NOT NULL,
                    total_revenue NUMERIC(18, 2) NOT NULL,
                    order_count BIGINT NOT NULL,
                    PRIMARY KEY ({date_col}, product_id, sku)
                )
                "#,
                table = ch.table,
                date_col = ch.date_column,
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        tracing::info!("Schema ready: ledger {} + {} channel tables", ledger.table, config.channels.len());
        Ok(())
    }

    /// 带超时的语句执行
    async fn timed<T, F>(&self, table: &str, what: &str, fut: F) -> Result<T, WarehouseError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(Ok(v)) => {
                tracing::debug!("{} on {} ok, 耗时: {:?}", what, table, start.elapsed());
                Ok(v)
            }
            Ok(Err(e)) => {
                tracing::error!("✗ {} on {} failed, 耗时: {:?}, 错误: {:?}", what, table, start.elapsed(), e);
                Err(map_driver_error(table, e))
            }
            Err(_) => {
                tracing::error!("✗ {} on {} 超时 (>{}秒)!", what, table, self.statement_timeout.as_secs());
                Err(WarehouseError::Timeout(self.statement_timeout.as_secs()))
            }
        }
    }
}

/// 表不存在 (42P01) / 列不存在 (42703) 映射为明确错误
fn map_driver_error(table: &str, e: sqlx::Error) -> WarehouseError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("42P01") => return WarehouseError::UnknownTable(table.to_string()),
            Some("42703") => {
                return WarehouseError::UnknownColumn {
                    table: table.to_string(),
                    column: db.message().to_string(),
                }
            }
            _ => {}
        }
    }
    WarehouseError::Driver(e)
}

fn check_all(idents: &[&str]) -> Result<(), WarehouseError> {
    idents.iter().try_for_each(|i| check_identifier(i))
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn delete_window(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<u64, WarehouseError> {
        check_all(&[table, date_column])?;
        let sql = format!("DELETE FROM {table} WHERE {date_column} BETWEEN $1 AND $2");
        let result = self
            .timed(
                table,
                "DELETE",
                sqlx::query(&sql).bind(window.start()).bind(window.end()).execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_sales(
        &self,
        table: &str,
        date_column: &str,
        rows: &[ChannelDailyProductSales],
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        check_all(&[table, date_column])?;

        let mut inserted = 0u64;
        for chunk in rows.chunks(INSERT_CHUNK) {
            tracing::debug!("开始构建批量插入语句, {} 条记录", chunk.len());
            let mut query_builder = sqlx::QueryBuilder::new(format!(
                "INSERT INTO {table} (
                    {date_column}, product_id, sku, product_name,
                    total_quantity_sold, avg_unit_price, total_revenue, order_count
                ) "
            ));

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.order_date)
                    .push_bind(row.product_id)
                    .push_bind(&row.sku)
                    .push_bind(&row.product_name)
                    .push_bind(row.total_quantity_sold)
                    .push_bind(row.avg_unit_price.clone())
                    .push_bind(row.total_revenue.clone())
                    .push_bind(row.order_count);
            });

            let result = self
                .timed(table, "INSERT", query_builder.build().execute(&self.pool))
                .await?;
            tracing::info!("✓ INSERT {} 影响 {} 行", table, result.rows_affected());
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn load_sales(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<ChannelDailyProductSales>, WarehouseError> {
        check_all(&[table, date_column])?;
        let sql = format!(
            r#"
            SELECT {date_column} AS order_date, product_id, sku, product_name,
                   total_quantity_sold, avg_unit_price, total_revenue, order_count
            FROM {table}
            WHERE {date_column} BETWEEN $1 AND $2
            ORDER BY {date_column}, product_id, sku
            "#
        );
        self.timed(
            table,
            "SELECT",
            sqlx::query_as::<_, ChannelDailyProductSales>(&sql)
                .bind(window.start())
                .bind(window.end())
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn daily_sums(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<(NaiveDate, BigDecimal)>, WarehouseError> {
        check_all(&[table, date_column, value_column])?;
        let sql = format!(
            r#"
            SELECT {date_column}::date AS day,
                   COALESCE(SUM({value_column}), 0)::numeric AS total
            FROM {table}
            WHERE {date_column}::date BETWEEN $1 AND $2
            GROUP BY 1
            ORDER BY 1
            "#
        );
        self.timed(
            table,
            "SUM GROUP BY",
            sqlx::query_as::<_, (NaiveDate, BigDecimal)>(&sql)
                .bind(window.start())
                .bind(window.end())
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn upsert_ledger(
        &self,
        table: &str,
        date_column: &str,
        rows: &[MasterDailyRecord],
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        check_all(&[table, date_column])?;

        let mut affected = 0u64;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut query_builder = sqlx::QueryBuilder::new(format!(
                "INSERT INTO {table} (
                    {date_column}, amazon_sales, woocommerce_sales, shopify_sales,
                    total_sales, currency, created_at
                ) "
            ));

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.date)
                    .push_bind(row.amazon_sales.clone())
                    .push_bind(row.woocommerce_sales.clone())
                    .push_bind(row.shopify_sales.clone())
                    .push_bind(row.total_sales.clone())
                    .push_bind(&row.currency)
                    .push_bind(row.created_at);
            });

            // 渠道列整体覆盖, 不做 COALESCE(old) + new 累加
            query_builder.push(format!(
                " ON CONFLICT ({date_column}) DO UPDATE SET
                    amazon_sales = EXCLUDED.amazon_sales,
                    woocommerce_sales = EXCLUDED.woocommerce_sales,
                    shopify_sales = EXCLUDED.shopify_sales,
                    total_sales = EXCLUDED.total_sales,
                    currency = EXCLUDED.currency,
                    created_at = EXCLUDED.created_at"
            ));

            let result = self
                .timed(table, "UPSERT", query_builder.build().execute(&self.pool))
                .await?;
            affected += result.rows_affected();
        }

        Ok(affected)
    }

    async fn load_ledger(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<MasterDailyRecord>, WarehouseError> {
        check_all(&[table, date_column])?;
        let sql = format!(
            r#"
            SELECT {date_column} AS date, amazon_sales, woocommerce_sales, shopify_sales,
                   total_sales, currency, created_at
            FROM {table}
            WHERE {date_column} BETWEEN $1 AND $2
            ORDER BY {date_column}
            "#
        );
        self.timed(
            table,
            "SELECT",
            sqlx::query_as::<_, MasterDailyRecord>(&sql)
                .bind(window.start())
                .bind(window.end())
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn max_date(&self, table: &str, date_column: &str) -> Result<Option<NaiveDate>, WarehouseError> {
        check_all(&[table, date_column])?;
        let sql = format!("SELECT MAX({date_column})::date FROM {table}");
        self.timed(
            table,
            "MAX",
            sqlx::query_scalar::<_, Option<NaiveDate>>(&sql).fetch_one(&self.pool),
        )
        .await
    }

    async fn sum_column(
        &self,
        table: &str,
        date_column: &str,
        value_column: &str,
        window: &DateWindow,
    ) -> Result<BigDecimal, WarehouseError> {
        check_all(&[table, date_column, value_column])?;
        let sql = format!(
            "SELECT COALESCE(SUM({value_column}), 0)::numeric FROM {table} \
             WHERE {date_column}::date BETWEEN $1 AND $2"
        );
        self.timed(
            table,
            "SUM",
            sqlx::query_scalar::<_, BigDecimal>(&sql)
                .bind(window.start())
                .bind(window.end())
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn distinct_dates(
        &self,
        table: &str,
        date_column: &str,
        window: &DateWindow,
    ) -> Result<Vec<NaiveDate>, WarehouseError> {
        check_all(&[table, date_column])?;
        let sql = format!(
            "SELECT DISTINCT {date_column}::date FROM {table} \
             WHERE {date_column}::date BETWEEN $1 AND $2 ORDER BY 1"
        );
        self.timed(
            table,
            "DISTINCT",
            sqlx::query_scalar::<_, NaiveDate>(&sql)
                .bind(window.start())
                .bind(window.end())
                .fetch_all(&self.pool),
        )
        .await
    }
}
