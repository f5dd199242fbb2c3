use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{RetryConfig, SourceConfig};
use crate::error::FetchError;
use crate::models::DateWindow;

/// 单页订单
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<Value>,
    pub next_page: Option<u32>,
}

/// 供应商订单来源: "列出 [after, before] 内创建的订单", 分页
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn list_orders(&self, window: &DateWindow, page: u32) -> Result<OrderPage, FetchError>;
}

/// 拉取窗口内全部订单, 每页独立重试
/// 可重试错误按指数退避重试, 401/403 等直接返回
pub async fn fetch_all_orders(
    channel: &str,
    source: &dyn OrderSource,
    window: &DateWindow,
    retry: &RetryConfig,
) -> Result<Vec<Value>, FetchError> {
    let mut orders = Vec::new();
    let mut page = 0u32;

    loop {
        let result = fetch_page_with_retry(channel, source, window, page, retry).await?;
        tracing::debug!("{}: 第 {} 页 {} 个订单", channel, page, result.orders.len());
        orders.extend(result.orders);
        match result.next_page {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }

    tracing::info!("{}: 拉取 {} 个订单, 窗口 {}", channel, orders.len(), window);
    Ok(orders)
}

async fn fetch_page_with_retry(
    channel: &str,
    source: &dyn OrderSource,
    window: &DateWindow,
    page: u32,
    retry: &RetryConfig,
) -> Result<OrderPage, FetchError> {
    let mut backoff = retry.initial_backoff_ms;
    let mut attempt = 1u32;

    loop {
        match source.list_orders(window, page).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                tracing::warn!("{}: page {} failed (attempt {}): {}", channel, page, attempt, e);
                tracing::debug!("Retrying in {}ms", backoff);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(retry.max_backoff_ms);
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{}: page {} failed after {} attempt(s): {}", channel, page, attempt, e);
                return Err(e);
            }
        }
    }
}

/// 按配置构建订单来源
pub fn build_source(config: &SourceConfig) -> Arc<dyn OrderSource> {
    match config {
        SourceConfig::JsonDir { path } => Arc::new(JsonDirSource::new(path)),
        SourceConfig::CsvExport { path, columns, delimiter } => {
            Arc::new(CsvExportSource::new(path, columns.clone(), *delimiter))
        }
    }
}

/// 列出目录下指定扩展名的文件 (排序, 每个文件一页)
async fn list_pages(path: &Path, extension: &str) -> Result<Vec<PathBuf>, FetchError> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let p = entry.path();
        if p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case(extension)) {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

fn page_of(files: &[PathBuf], page: u32) -> Option<(&PathBuf, Option<u32>)> {
    let idx = page as usize;
    files.get(idx).map(|f| {
        let next = if idx + 1 < files.len() { Some(page + 1) } else { None };
        (f, next)
    })
}

/// 供应商 JSON 订单导出目录
/// 文件内容为订单数组, 或 {"orders": [...]}
pub struct JsonDirSource {
    path: PathBuf,
}

impl JsonDirSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OrderSource for JsonDirSource {
    async fn list_orders(&self, _window: &DateWindow, page: u32) -> Result<OrderPage, FetchError> {
        let files = list_pages(&self.path, "json").await?;
        let Some((file, next_page)) = page_of(&files, page) else {
            return Ok(OrderPage::default());
        };

        let bytes = tokio::fs::read(file).await?;
        let doc: Value = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Decode(format!("{}: {}", file.display(), e)))?;
        let orders = match doc {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("orders") {
                Some(Value::Array(items)) => items,
                _ => return Err(FetchError::Decode(format!("{}: missing orders array", file.display()))),
            },
            _ => return Err(FetchError::Decode(format!("{}: unexpected document", file.display()))),
        };

        Ok(OrderPage { orders, next_page })
    }
}

/// 表格导出 CSV (如 Amazon 报表)
/// columns 将导出列名映射为供应商字段名, 未映射的列保留原名
pub struct CsvExportSource {
    path: PathBuf,
    columns: HashMap<String, String>,
    delimiter: u8,
}

impl CsvExportSource {
    pub fn new(path: impl Into<PathBuf>, columns: HashMap<String, String>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            columns,
            delimiter: if delimiter.is_ascii() { delimiter as u8 } else { b',' },
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Value>, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| self.columns.get(h).cloned().unwrap_or_else(|| h.to_string()))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let obj: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, v)| !v.is_empty())
                .map(|(h, v)| (h.clone(), Value::String(v.to_string())))
                .collect();
            rows.push(Value::Object(obj));
        }
        Ok(rows)
    }
}

#[async_trait]
impl OrderSource for CsvExportSource {
    async fn list_orders(&self, _window: &DateWindow, page: u32) -> Result<OrderPage, FetchError> {
        let files = list_pages(&self.path, "csv").await?;
        let Some((file, next_page)) = page_of(&files, page) else {
            return Ok(OrderPage::default());
        };

        let bytes = tokio::fs::read(file).await?;
        let orders = self
            .parse(&bytes)
            .map_err(|e| FetchError::Decode(format!("{}: {}", file.display(), e)))?;

        Ok(OrderPage { orders, next_page })
    }
}

/// 内存订单来源: 预先拉取的订单 / 测试
/// 可排队注入错误, 每次调用消费一个
#[derive(Default)]
pub struct MemorySource {
    orders: Mutex<Vec<Value>>,
    page_size: usize,
    failures: Mutex<VecDeque<FetchError>>,
    calls: Mutex<u32>,
}

impl MemorySource {
    pub fn new(orders: Vec<Value>) -> Self {
        Self {
            orders: Mutex::new(orders),
            page_size: 100,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn set_orders(&self, orders: Vec<Value>) {
        *self.orders.lock().unwrap_or_else(|p| p.into_inner()) = orders;
    }

    pub fn push_failure(&self, err: FetchError) {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).push_back(err);
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl OrderSource for MemorySource {
    async fn list_orders(&self, _window: &DateWindow, page: u32) -> Result<OrderPage, FetchError> {
        *self.calls.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        if let Some(err) = self.failures.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
            return Err(err);
        }

        let orders = self.orders.lock().unwrap_or_else(|p| p.into_inner());
        let page_size = self.page_size.max(1);
        let start = page as usize * page_size;
        let chunk: Vec<Value> = orders.iter().skip(start).take(page_size).cloned().collect();
        let next_page = if start + page_size < orders.len() { Some(page + 1) } else { None };

        Ok(OrderPage { orders: chunk, next_page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn window() -> DateWindow {
        DateWindow::single(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap())
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig { max_attempts, initial_backoff_ms: 0, max_backoff_ms: 0 }
    }

    #[tokio::test]
    async fn paginates_until_last_page() {
        let orders: Vec<Value> = (0..5).map(|i| json!({ "id": i })).collect();
        let source = MemorySource::new(orders).with_page_size(2);
        let all = fetch_all_orders("test", &source, &window(), &fast_retry(3)).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let source = MemorySource::new(vec![json!({ "id": 1 })]);
        source.push_failure(FetchError::Transient("timeout".into()));
        source.push_failure(FetchError::Transient("502".into()));
        let all = fetch_all_orders("test", &source, &window(), &fast_retry(3)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let source = MemorySource::new(vec![]);
        for _ in 0..5 {
            source.push_failure(FetchError::Transient("timeout".into()));
        }
        let err = fetch_all_orders("test", &source, &window(), &fast_retry(3)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let source = MemorySource::new(vec![]);
        source.push_failure(FetchError::Unauthorized { status: 401, message: "bad key".into() });
        let err = fetch_all_orders("test", &source, &window(), &fast_retry(3)).await.unwrap_err();
        assert!(matches!(err, FetchError::Unauthorized { status: 401, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn csv_export_renames_columns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("2025-10.csv"),
            "Order ID\tDate\tsku\tqty\tItem Price\n111-1\t45931\tHEAT_A\t2\t$538.00\n",
        )
        .unwrap();
        let columns: HashMap<String, String> = [
            ("Order ID", "amazon-order-id"),
            ("Date", "purchase-date"),
            ("qty", "quantity-purchased"),
            ("Item Price", "item-price"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let source = CsvExportSource::new(dir.path(), columns, '\t');
        let page = source.list_orders(&window(), 0).await.unwrap();
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.next_page, None);
        assert_eq!(page.orders[0]["amazon-order-id"], "111-1");
        assert_eq!(page.orders[0]["item-price"], "$538.00");
    }

    #[tokio::test]
    async fn json_dir_pages_by_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"orders": [{"id": 3}]}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = JsonDirSource::new(dir.path());
        let all = fetch_all_orders("woo", &source, &window(), &fast_retry(1)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let source = JsonDirSource::new("/definitely/not/here");
        let err = source.list_orders(&window(), 0).await.unwrap_err();
        assert!(matches!(err, FetchError::Io(_)));
    }
}
