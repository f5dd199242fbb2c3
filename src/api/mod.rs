pub mod handlers;
pub mod in_flight;

pub use handlers::*;
pub use in_flight::{InFlight, InFlightGuard};
