//! Bounded change history used by the diagnostics snapshot

mod change_history;
mod ring;

pub use change_history::*;
pub use ring::*;
