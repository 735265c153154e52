//! # corral-network
//!
//! Container networking for the corral runtime.
//!
//! Handles:
//! - **IPAM**: a persisted per-subnet allocation bitmap guarded by a file lock.
//! - **Networks**: named networks stored one file each, driven through the
//!   [`NetworkDriver`](network::NetworkDriver) trait.
//! - **Bridge driver**: Linux bridge, veth pairs, in-namespace address and
//!   route setup, and iptables masquerade / port-forwarding rules.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod command;
pub mod iptables;
pub mod ipam;
pub mod link;
pub mod network;
