use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 标准化订单行 (CanonicalOrderLine)
/// 仅作为归一化 → 聚合之间的中间值, 不单独落库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrderLine {
    pub order_date: NaiveDate,
    pub product_id: i64,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
    pub order_id: String,
}

/// 单个订单的归一化结果
#[derive(Debug, Clone, Default)]
pub struct NormalizedOrder {
    pub lines: Vec<CanonicalOrderLine>,
    /// 因日期无法解析而丢弃的行数
    pub dropped_lines: usize,
    /// 订单状态被排除 (取消/退款等)
    pub skipped: bool,
}

/// 一批订单的归一化统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeStats {
    pub orders_seen: usize,
    pub orders_skipped: usize,
    pub lines_normalized: usize,
    pub lines_dropped: usize,
}
