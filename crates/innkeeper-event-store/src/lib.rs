//! Innkeeper Event Store: the audit trail.
//!
//! An immutable, time-partitioned log of every state change across
//! aggregates, with a snapshot mechanism that bounds replay cost and a
//! retention enforcer for compliance deadlines. [`AuditStore`] ties the
//! components together behind the producer (`append`), consumer
//! (`reconstruct`) and administrative (`precreate`, `retire`, `sweep`)
//! operations.

pub mod append;
pub mod config;
mod locks;
pub mod memory;
pub mod partition;
pub mod pg_audit_storage;
pub mod replay;
pub mod retention;
pub mod scheduler;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use config::AuditStoreConfig;
pub use memory::InMemoryAuditStorage;
pub use pg_audit_storage::PgAuditStorage;
pub use store::AuditStore;
