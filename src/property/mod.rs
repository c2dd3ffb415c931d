//! Local mirror of remote configuration values
//!
//! - [`PropertyModel`] - value object for one key
//! - [`PropertyCache`] - thread safe map of every known key
//! - [`ValueType`] / [`PropertyValue`] - conversion of raw store strings

mod cache;
mod model;
mod value;

pub use cache::*;
pub use model::*;
pub use value::*;
