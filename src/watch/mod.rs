//! Watch stream consumption
//!
//! One spawned task per process drives [`WatchDispatcher::run`]. Events are
//! processed one at a time in delivery order, so listeners must be fast: a
//! slow listener delays every event behind it.

mod dispatcher;

pub use dispatcher::*;
