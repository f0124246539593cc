//! # agora-store
//!
//! Typed persistence for debates and usage records. The repository traits
//! are the contract the rest of the system programs against; SQLite is
//! the bundled implementation. Authorization does not live here.

pub mod repo;
pub mod sqlite;

pub use repo::{DebateDraft, DebateRepository, UsageStore};
pub use sqlite::SqliteStore;
