//! Prepflow Context Store
//!
//! Per-execution state for the multi-step query execution engine:
//! - Step results recorded as they arrive
//! - Entity cache (people, meetings, documents, topics) derived from results
//! - Intermediate-data aliases so later steps can consume common projections
//! - Bounded conversation history for prompt construction
//! - Store-level eviction by age and count
//!
//! This crate knows nothing about strategies or orchestration; it only
//! tracks what one execution has seen so far.

#![warn(unreachable_pub)]

pub mod context;
pub mod entity;
pub mod error;
pub mod result;
pub mod store;

pub use context::{ContextMetadata, ConversationEntry, ExecutionContext};
pub use entity::{CachedEntity, EntityCache, EntityCategory};
pub use error::ContextError;
pub use result::StepResult;
pub use store::{ContextStore, ContextStoreConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
