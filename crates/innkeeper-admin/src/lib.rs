//! Innkeeper admin: operator surface for the audit store.
//!
//! Exposes partition provisioning, retirement, retention sweeps and snapshot
//! flushing over HTTP, and hosts the background maintenance scheduler in the
//! `innkeeper-admin` binary.

pub mod config;
pub mod error;
pub mod ops;
pub mod routes;
pub mod state;
