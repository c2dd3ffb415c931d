//! Application facing facade over the cache, listeners, watch and locks

mod property_service;
mod stat;

pub use property_service::*;
pub use stat::*;
