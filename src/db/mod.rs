pub mod memory;
pub mod pool;
pub mod queries;
pub mod warehouse;

pub use memory::MemoryWarehouse;
pub use pool::create_pool;
pub use queries::PgWarehouse;
pub use warehouse::{check_identifier, Warehouse};
