//! # Context Field Common Library
//!
//! Shared code for the context field merge engine and its hosts:
//! - Error types
//! - Configuration loading (TOML + environment)
//! - Event types (EngineEvent enum) and the event bus
//! - Clock abstraction for time-dependent components
//! - SQLite pool initialisation and schema
//! - Tracing setup

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
