//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups**: a manager fanning limits and pids out to per-subsystem
//!   drivers for CPU shares, CPU sets, and memory.
//! - **Namespaces**: the five namespace kinds a container gets, joining
//!   them by pid, and the pre-main namespace-entry hook used by `exec`.
//! - **Filesystem**: `OverlayFS` mounts, bind mounts, `pivot_root`, and the
//!   pseudo-filesystems mounted inside a fresh root.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
