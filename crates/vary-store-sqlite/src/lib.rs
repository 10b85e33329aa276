//! SQLite backend for the Vary variant store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Uniqueness of assignments is enforced
//! by the schema; see [`schema`](crate::schema) for the constraints.

mod encode;
mod query;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
