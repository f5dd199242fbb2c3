use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 渠道日/商品销售汇总 (ChannelDailyProductSales)
/// 主键: (order_date, product_id, sku), 在单个渠道表内唯一
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ChannelDailyProductSales {
    pub order_date: NaiveDate,
    pub product_id: i64,
    pub sku: String,
    pub product_name: String,
    pub total_quantity_sold: i64,
    pub avg_unit_price: BigDecimal, // 行单价算术平均, 非按数量加权
    pub total_revenue: BigDecimal,
    pub order_count: i64,           // 贡献行数, 非去重订单数
}

impl ChannelDailyProductSales {
    pub const COLUMNS: &'static [&'static str] = &[
        "order_date",
        "product_id",
        "sku",
        "product_name",
        "total_quantity_sold",
        "avg_unit_price",
        "total_revenue",
        "order_count",
    ];

    pub fn key(&self) -> (NaiveDate, i64, &str) {
        (self.order_date, self.product_id, self.sku.as_str())
    }

    /// 按列名取数值列, 供聚合查询使用
    pub fn numeric_column(&self, column: &str) -> Option<BigDecimal> {
        match column {
            "total_quantity_sold" => Some(BigDecimal::from(self.total_quantity_sold)),
            "avg_unit_price" => Some(self.avg_unit_price.clone()),
            "total_revenue" => Some(self.total_revenue.clone()),
            "order_count" => Some(BigDecimal::from(self.order_count)),
            "product_id" => Some(BigDecimal::from(self.product_id)),
            _ => None,
        }
    }
}

/// 渠道日收入 (由 total_revenue 按日期求和, 不落库)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDailyTotal {
    pub order_date: NaiveDate,
    pub channel_name: String,
    pub revenue: BigDecimal,
}
