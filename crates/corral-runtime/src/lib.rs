//! Container lifecycle management for the corral runtime.
//!
//! There is no daemon: every invocation rebuilds its view of the host from
//! the per-container records under the run directory, acts, and exits.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod exec;
pub mod init;
pub mod launcher;
pub mod logs;
pub mod registry;
