use thiserror::Error;

/// 供应商订单拉取错误
#[derive(Debug, Error)]
pub enum FetchError {
    /// 网络超时/5xx 等可重试错误
    #[error("Transient fetch failure: {0}")]
    Transient(String),
    /// 401/403, 不重试
    #[error("Source rejected credentials (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("Source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not decode source payload: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// 数仓访问错误
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Database driver error: {0}")]
    Driver(#[from] sqlx::Error),
    #[error("Warehouse statement timed out after {0}s")]
    Timeout(u64),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl WarehouseError {
    /// 表/列/标识符不存在: 配置错误, 不应按瞬时故障处理
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WarehouseError::UnknownTable(_)
                | WarehouseError::UnknownColumn { .. }
                | WarehouseError::InvalidIdentifier(_)
        )
    }
}

/// 作业入口对外传播的错误 (配置类/不变量类)
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Channel {channel} credentials rejected: {source}")]
    Unauthorized {
        channel: String,
        #[source]
        source: FetchError,
    },
    #[error("Invalid date window: {0}")]
    InvalidWindow(String),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error("Ledger invariant violated: {0}")]
    Invariant(String),
}

impl From<config::ConfigError> for ReconcileError {
    fn from(e: config::ConfigError) -> Self {
        ReconcileError::Config(e.to_string())
    }
}

/// 通知投递错误 (永远不影响诊断结果)
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Notification encoding error: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for NotifyError {
    fn from(e: serde_json::Error) -> Self {
        NotifyError::Encode(e.to_string())
    }
}

impl From<csv::Error> for NotifyError {
    fn from(e: csv::Error) -> Self {
        NotifyError::Encode(e.to_string())
    }
}
