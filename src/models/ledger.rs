use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 主账本渠道列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerColumn {
    AmazonSales,
    WoocommerceSales,
    ShopifySales,
}

impl LedgerColumn {
    pub const ALL: [LedgerColumn; 3] = [
        LedgerColumn::AmazonSales,
        LedgerColumn::WoocommerceSales,
        LedgerColumn::ShopifySales,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerColumn::AmazonSales => "amazon_sales",
            LedgerColumn::WoocommerceSales => "woocommerce_sales",
            LedgerColumn::ShopifySales => "shopify_sales",
        }
    }
}

impl fmt::Display for LedgerColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 主账本日记录 (MasterDailyRecord)
/// 不变量: total_sales == amazon_sales + woocommerce_sales + shopify_sales
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MasterDailyRecord {
    pub date: NaiveDate,
    pub amazon_sales: BigDecimal,
    pub woocommerce_sales: BigDecimal,
    pub shopify_sales: BigDecimal,
    pub total_sales: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>, // 最后写入时间
}

impl MasterDailyRecord {
    pub fn empty(date: NaiveDate, currency: &str) -> Self {
        Self {
            date,
            amazon_sales: BigDecimal::zero(),
            woocommerce_sales: BigDecimal::zero(),
            shopify_sales: BigDecimal::zero(),
            total_sales: BigDecimal::zero(),
            currency: currency.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn get(&self, column: LedgerColumn) -> &BigDecimal {
        match column {
            LedgerColumn::AmazonSales => &self.amazon_sales,
            LedgerColumn::WoocommerceSales => &self.woocommerce_sales,
            LedgerColumn::ShopifySales => &self.shopify_sales,
        }
    }

    /// 渠道列设为绝对值 (非累加)
    pub fn set(&mut self, column: LedgerColumn, value: BigDecimal) {
        match column {
            LedgerColumn::AmazonSales => self.amazon_sales = value,
            LedgerColumn::WoocommerceSales => self.woocommerce_sales = value,
            LedgerColumn::ShopifySales => self.shopify_sales = value,
        }
    }

    pub fn channel_sum(&self) -> BigDecimal {
        &self.amazon_sales + &self.woocommerce_sales + &self.shopify_sales
    }

    pub fn recompute_total(&mut self) {
        self.total_sales = self.channel_sum();
    }

    pub fn is_additive(&self) -> bool {
        self.total_sales == self.channel_sum()
    }

    /// 比较数值内容, 忽略写入时间
    pub fn same_values(&self, other: &MasterDailyRecord) -> bool {
        self.date == other.date
            && self.amazon_sales == other.amazon_sales
            && self.woocommerce_sales == other.woocommerce_sales
            && self.shopify_sales == other.shopify_sales
            && self.total_sales == other.total_sales
            && self.currency == other.currency
    }

    pub fn numeric_column(&self, column: &str) -> Option<BigDecimal> {
        match column {
            "amazon_sales" => Some(self.amazon_sales.clone()),
            "woocommerce_sales" => Some(self.woocommerce_sales.clone()),
            "shopify_sales" => Some(self.shopify_sales.clone()),
            "total_sales" => Some(self.total_sales.clone()),
            _ => None,
        }
    }
}
