use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::models::{CanonicalOrderLine, ChannelDailyProductSales, DateWindow};

/// 分组累加器
struct GroupAcc {
    product_name: String,
    quantity: i64,
    revenue: BigDecimal,
    line_count: i64,
    price_sum: BigDecimal,
    priced_lines: i64,
}

/// 聚合结果
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub rows: Vec<ChannelDailyProductSales>,
    /// 落在窗口外被忽略的行数
    pub outside_window: usize,
}

/// 按 (order_date, product_id, sku) 聚合窗口内的标准化行
///
/// * total_quantity_sold / total_revenue: 组内求和
/// * order_count: 贡献行数 (多行订单按行计)
/// * avg_unit_price: 正单价的算术平均, 保留两位; 无正单价时为 0
///
/// 输出按主键排序, 同一输入重复聚合结果完全一致。
pub fn aggregate_daily(channel: &str, lines: &[CanonicalOrderLine], window: &DateWindow) -> Aggregation {
    let mut groups: IndexMap<(NaiveDate, i64, String), GroupAcc> = IndexMap::new();
    let mut outside_window = 0usize;

    for line in lines {
        if !window.contains(line.order_date) {
            outside_window += 1;
            continue;
        }

        let acc = groups
            .entry((line.order_date, line.product_id, line.sku.clone()))
            .or_insert_with(|| GroupAcc {
                product_name: String::new(),
                quantity: 0,
                revenue: BigDecimal::zero(),
                line_count: 0,
                price_sum: BigDecimal::zero(),
                priced_lines: 0,
            });

        if acc.product_name.is_empty() && !line.product_name.is_empty() {
            acc.product_name = line.product_name.clone();
        }
        acc.quantity += line.quantity;
        acc.revenue += &line.line_total;
        acc.line_count += 1;
        if line.unit_price > BigDecimal::zero() {
            acc.price_sum += &line.unit_price;
            acc.priced_lines += 1;
        }
    }

    if outside_window > 0 {
        tracing::debug!("{}: {} 行不在窗口 {} 内, 已忽略", channel, outside_window, window);
    }

    groups.sort_keys();

    let rows = groups
        .into_iter()
        .map(|((order_date, product_id, sku), acc)| {
            let avg_unit_price = if acc.priced_lines > 0 {
                (&acc.price_sum / &BigDecimal::from(acc.priced_lines)).round(2)
            } else {
                BigDecimal::zero()
            };
            ChannelDailyProductSales {
                order_date,
                product_id,
                sku,
                product_name: acc.product_name,
                total_quantity_sold: acc.quantity,
                avg_unit_price,
                total_revenue: acc.revenue,
                order_count: acc.line_count,
            }
        })
        .collect();

    Aggregation { rows, outside_window }
}

/// 汇总行金额合计
pub fn total_revenue(rows: &[ChannelDailyProductSales]) -> BigDecimal {
    rows.iter().fold(BigDecimal::zero(), |acc, r| acc + &r.total_revenue)
}
