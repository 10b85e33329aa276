//! Core types and trait definitions for the Vary variant assignment engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.
//!
//! The pieces, leaf-first:
//!
//! - [`parent`]: the post / product-experiment a variant belongs to.
//! - [`variant`] and [`rule`]: content alternatives and their traffic rules.
//! - [`identity`] and [`assignment`]: who is bound to which variant.
//! - [`select`]: the rule-based and weighted-random selection algorithms.
//! - [`store`]: the storage abstraction backends implement.
//! - [`engine`]: `find_or_assign` and exposure/conversion recording.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod assignment;
pub mod engine;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod parent;
pub mod rule;
pub mod select;
pub mod store;
pub mod variant;

pub use error::{Error, Result};
