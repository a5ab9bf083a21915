// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Synchronization primitives used across the workspace.
//!
//! Everything that takes part in the writer/reader protocols of the flow tables
//! imports its locks, atomics and threads from here, so that enabling the
//! `shuttle` feature swaps them all for their model-checked counterparts.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

#[cfg(not(feature = "shuttle"))]
pub use std::sync;
#[cfg(not(feature = "shuttle"))]
pub use std::thread;

#[cfg(feature = "shuttle")]
pub use shuttle::sync;
#[cfg(feature = "shuttle")]
pub use shuttle::thread;

use std::sync::{LockResult, PoisonError};

/// Recover the guard of a poisoned lock.
///
/// A thread panicking while holding one of our locks leaves the protected data
/// consistent (all mutations are single assignments), so the poison flag
/// carries no information we act upon.
pub trait Recover<G> {
    /// Get the guard, whether or not the lock was poisoned.
    fn recover(self) -> G;
}

impl<G> Recover<G> for LockResult<G> {
    fn recover(self) -> G {
        self.unwrap_or_else(PoisonError::into_inner)
    }
}
