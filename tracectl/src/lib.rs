// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Crate to control tracing dynamically at runtime
//!
//! The host builds a [`LogConfig`] (usually as part of its own configuration),
//! installs the subscriber once with [`TracingControl::init`] and keeps the
//! returned handle to change levels afterwards.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod control;
pub mod display;
pub mod errors;

// re-exports
pub use config::{LogConfig, LogLevel};
pub use control::TracingControl;
pub use errors::TraceCtlError;
