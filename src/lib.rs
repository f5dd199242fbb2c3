pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, MemoryWarehouse, PgWarehouse, Warehouse};
pub use error::{FetchError, NotifyError, ReconcileError, WarehouseError};
pub use service::ReconcileService;
