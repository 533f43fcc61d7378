//! Innkeeper Core: audit event model and storage contracts.
//!
//! This crate defines the immutable event record, the aggregate and payload
//! decoding contracts, the error taxonomy and the storage traits the audit
//! store is built on. It contains no infrastructure code.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod partition;
pub mod payload;
pub mod storage;
pub mod time;
pub mod validate;
