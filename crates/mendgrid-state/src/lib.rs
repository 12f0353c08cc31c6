//! mendgrid-state — embedded object store for MendGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for nodes, remediation policies, legacy health checks, remediation
//! handles, and cluster-wide flags.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Policies carry a `resource_version` that the store bumps on every write;
//! status writes are compare-and-swap against it so concurrent writers never
//! merge stale and fresh status.
//!
//! Every mutation is published as a `StoreEvent` on a broadcast channel so
//! the controller can react the way a list-and-watch client would.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod events;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use events::StoreEvent;
pub use store::{RemediationRecord, StateStore};
