//! Listener registrations keyed by exact key or key prefix

mod registry;

pub use registry::*;
