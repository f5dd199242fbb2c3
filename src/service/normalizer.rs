use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{ProductEntry, VendorFormat};
use crate::models::{CanonicalOrderLine, NormalizeStats, NormalizedOrder};

/// 表格序列日期起点 (serial 0 = 1899-12-30)
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
/// 9999-12-31 对应的序列值
const SERIAL_MAX: f64 = 2_958_465.0;

/// 商品目录: SKU → (商品ID, 名称)
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    by_sku: HashMap<String, (i64, String)>,
}

impl ProductCatalog {
    pub fn from_entries(entries: &[ProductEntry]) -> Self {
        let by_sku = entries
            .iter()
            .map(|p| (p.sku.clone(), (p.product_id, p.name.clone())))
            .collect();
        Self { by_sku }
    }

    pub fn lookup(&self, sku: &str) -> Option<(i64, &str)> {
        self.by_sku.get(sku).map(|(id, name)| (*id, name.as_str()))
    }
}

/// 各供应商的字段名 (按优先级尝试)
struct VendorFields {
    date: &'static [&'static str],
    order_id: &'static [&'static str],
    status: &'static [&'static str],
    /// None: 扁平报表, 一行即一个订单行
    lines: Option<&'static str>,
    product_id: &'static [&'static str],
    sku: &'static [&'static str],
    name: &'static [&'static str],
    quantity: &'static [&'static str],
    unit_price: &'static [&'static str],
    line_total: &'static [&'static str],
}

fn fields_for(vendor: VendorFormat) -> &'static VendorFields {
    const SHOPIFY: VendorFields = VendorFields {
        date: &["created_at", "processed_at"],
        order_id: &["name", "id", "order_number"],
        status: &["financial_status", "status"],
        lines: Some("line_items"),
        product_id: &["product_id"],
        sku: &["sku"],
        name: &["title", "name"],
        quantity: &["quantity"],
        unit_price: &["price"],
        line_total: &[],
    };
    const WOOCOMMERCE: VendorFields = VendorFields {
        date: &["date_created", "date_created_gmt"],
        order_id: &["number", "id"],
        status: &["status"],
        lines: Some("line_items"),
        product_id: &["product_id"],
        sku: &["sku"],
        name: &["name"],
        quantity: &["quantity"],
        unit_price: &["price"],
        line_total: &["total"],
    };
    // Amazon 报表的 item-price 是整行金额
    const AMAZON: VendorFields = VendorFields {
        date: &["purchase-date", "purchase_date"],
        order_id: &["amazon-order-id", "order-id"],
        status: &["order-status", "item-status"],
        lines: None,
        product_id: &[],
        sku: &["sku"],
        name: &["product-name"],
        quantity: &["quantity-purchased", "quantity"],
        unit_price: &[],
        line_total: &["item-price"],
    };
    const CANONICAL: VendorFields = VendorFields {
        date: &["order_date", "date"],
        order_id: &["order_id"],
        status: &["status"],
        lines: None,
        product_id: &["product_id"],
        sku: &["sku"],
        name: &["product_name"],
        quantity: &["quantity"],
        unit_price: &["unit_price"],
        line_total: &["line_total"],
    };

    match vendor {
        VendorFormat::Shopify => &SHOPIFY,
        VendorFormat::Woocommerce => &WOOCOMMERCE,
        VendorFormat::Amazon => &AMAZON,
        VendorFormat::Canonical => &CANONICAL,
    }
}

/// 取第一个存在且非 null 的字段
fn first<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

fn as_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// 原始订单归一化器 (纯函数, 供应商差异全部在这里消化)
#[derive(Debug, Clone)]
pub struct Normalizer {
    vendor: VendorFormat,
    excluded_statuses: HashSet<String>,
    catalog: Arc<ProductCatalog>,
}

impl Normalizer {
    pub fn new(vendor: VendorFormat, excluded_statuses: &[String], catalog: Arc<ProductCatalog>) -> Self {
        Self {
            vendor,
            excluded_statuses: excluded_statuses.iter().map(|s| s.to_lowercase()).collect(),
            catalog,
        }
    }

    pub fn vendor(&self) -> VendorFormat {
        self.vendor
    }

    /// 单个供应商订单 → 零或多个标准化行
    pub fn normalize_order(&self, raw: &Value) -> NormalizedOrder {
        let fields = fields_for(self.vendor);

        let status = as_text(first(raw, fields.status)).to_lowercase();
        if !status.is_empty() && self.excluded_statuses.contains(&status) {
            return NormalizedOrder { skipped: true, ..Default::default() };
        }
        // Shopify 取消订单只带 cancelled_at
        if self.vendor == VendorFormat::Shopify && first(raw, &["cancelled_at"]).is_some() {
            return NormalizedOrder { skipped: true, ..Default::default() };
        }

        let raw_lines: Vec<&Value> = match fields.lines {
            Some(key) => raw
                .get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default(),
            None => vec![raw],
        };

        let order_id = as_text(first(raw, fields.order_id));
        let Some(order_date) = first(raw, fields.date).and_then(parse_order_date) else {
            tracing::warn!(
                "订单 {} 日期无法解析, 丢弃 {} 行 ({:?})",
                order_id, raw_lines.len(), self.vendor
            );
            return NormalizedOrder { dropped_lines: raw_lines.len(), ..Default::default() };
        };

        let lines = raw_lines
            .into_iter()
            .map(|item| self.normalize_line(item, fields, order_date, &order_id))
            .collect();

        NormalizedOrder { lines, dropped_lines: 0, skipped: false }
    }

    fn normalize_line(
        &self,
        item: &Value,
        fields: &VendorFields,
        order_date: NaiveDate,
        order_id: &str,
    ) -> CanonicalOrderLine {
        let sku = as_text(first(item, fields.sku));
        let quantity = coerce_quantity(first(item, fields.quantity));
        let catalog_entry = self.catalog.lookup(&sku);

        let product_id = first(item, fields.product_id)
            .and_then(coerce_id)
            .or_else(|| catalog_entry.map(|(id, _)| id))
            .unwrap_or(0);

        let mut product_name = as_text(first(item, fields.name));
        if product_name.is_empty() {
            if let Some((_, name)) = catalog_entry {
                product_name = name.to_string();
            }
        }

        let explicit_total = first(item, fields.line_total).map(|v| coerce_decimal(Some(v)));
        let (unit_price, line_total) = if fields.unit_price.is_empty() {
            // 仅有整行金额: 单价 = 金额 / 数量
            let total = explicit_total.unwrap_or_else(BigDecimal::zero);
            let unit = if quantity > 0 {
                (&total / &BigDecimal::from(quantity)).round(2)
            } else {
                BigDecimal::zero()
            };
            (unit, total)
        } else {
            let unit = coerce_decimal(first(item, fields.unit_price));
            let total = explicit_total.unwrap_or_else(|| &unit * &BigDecimal::from(quantity));
            (unit, total)
        };

        CanonicalOrderLine {
            order_date,
            product_id,
            sku,
            product_name,
            quantity,
            unit_price,
            line_total,
            order_id: order_id.to_string(),
        }
    }

    /// 批量归一化 (并行, 输出顺序与输入一致)
    pub fn normalize_batch(&self, raws: &[Value]) -> (Vec<CanonicalOrderLine>, NormalizeStats) {
        let results: Vec<NormalizedOrder> = raws.par_iter().map(|r| self.normalize_order(r)).collect();

        let mut stats = NormalizeStats { orders_seen: raws.len(), ..Default::default() };
        let mut lines = Vec::new();
        for result in results {
            if result.skipped {
                stats.orders_skipped += 1;
            }
            stats.lines_dropped += result.dropped_lines;
            stats.lines_normalized += result.lines.len();
            lines.extend(result.lines);
        }

        if stats.lines_dropped > 0 {
            tracing::warn!(
                "{:?}: {} 行因日期无法解析被丢弃 (共 {} 个订单)",
                self.vendor, stats.lines_dropped, stats.orders_seen
            );
        }

        (lines, stats)
    }
}

/// 解析订单日期: ISO-8601 / 常见文本格式 / 表格序列数
pub fn parse_order_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(serial_to_date),
        Value::String(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    // 带时区: 取订单自身时区下的日期
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    s.parse::<f64>().ok().and_then(serial_to_date)
}

/// 序列日期 d → 1899-12-30 + d 天 (小数部分为时刻, 舍去)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(0.0..=SERIAL_MAX).contains(&serial) {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_signed(Duration::days(serial.floor() as i64))
}

/// 金额强制转换: 缺失/非数字/负数 → 0
pub fn coerce_decimal(value: Option<&Value>) -> BigDecimal {
    let parsed = match value {
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string()).ok(),
        Some(Value::String(s)) => parse_money(s),
        _ => None,
    };
    match parsed {
        Some(d) if d > BigDecimal::zero() => d,
        _ => BigDecimal::zero(),
    }
}

/// 去掉货币符号/千分位/空白后解析; 会计格式 "(5.00)" 为负数
fn parse_money(s: &str) -> Option<BigDecimal> {
    let trimmed = s.trim();
    let bracketed = trimmed.starts_with('(');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let amount = BigDecimal::from_str(&cleaned).ok()?;
    Some(if bracketed { -amount } else { amount })
}

/// 数量强制转换: 缺失/非数字/负数 → 0, 小数截断
pub fn coerce_quantity(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    };
    parsed.filter(|q| *q > 0).unwrap_or(0)
}

fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}
