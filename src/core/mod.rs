//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, runs, schedules and the execution context.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod schedule;
pub mod state;
pub mod step;
pub mod table;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use schedule::*;
pub use state::*;
pub use step::*;
pub use table::*;
