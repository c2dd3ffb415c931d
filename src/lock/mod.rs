//! Lease based distributed locking
//!
//! A lock attempt walks through [`LockState`]:
//!
//! ```text
//! Idle -> LeaseRequested -> LeaseGranted -> LockRequested
//!      -> LockHeld | LockTimeout | LockError -> Released
//! ```
//!
//! The lease ttl bounds how long a crashed holder can block others; the
//! acquire timeout bounds how long a contender waits before falling back.

mod coordinator;

pub use coordinator::*;

#[cfg(test)]
mod coordinator_test;
