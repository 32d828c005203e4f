//! Core domain models
//!
//! Patch rules, stages and the stage graph, the run context that threads
//! configuration through a run, and the report a run produces.

pub mod config;
pub mod pipeline;
pub mod rule;
pub mod stage;
pub mod graph;
pub mod condition;
pub mod context;
pub mod state;
pub mod report;

pub use pipeline::*;
pub use rule::*;
pub use stage::*;
pub use graph::*;
pub use context::*;
pub use state::*;
pub use report::*;
