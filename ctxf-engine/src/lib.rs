//! # Context Field Merge Engine
//!
//! Consolidates facts about a company proposed by untrusted, asynchronous
//! producers (analysis labs, AI inference, human edits) into one canonical,
//! auditable profile.
//!
//! ## Components (leaves first)
//! - `priority` - static ranking of producer classes
//! - `extract` - producer payload → `ProposalCandidate`s
//! - `quality` - deterministic 0-100 trust score per producer run
//! - `arbiter` - accept / reject / add-as-alternative decision table
//! - `alternatives` - bounded, ranked runner-up values per field
//! - `cooldown` - per-company proposal batch throttle
//! - `store` - the aggregate: commits decisions, exposes read views
//! - `api` - read-only HTTP surface for the store and score history

pub mod alternatives;
pub mod api;
pub mod arbiter;
pub mod cooldown;
pub mod error;
pub mod extract;
pub mod priority;
pub mod quality;
pub mod store;
pub mod types;

pub use crate::api::{build_router, AppState};
pub use crate::error::{EngineError, EngineResult};
pub use crate::store::FieldStore;
pub use crate::types::{
    Alternative, ContextField, FieldStatus, ProposalCandidate, ProposalOutcome, SourceTag,
};
