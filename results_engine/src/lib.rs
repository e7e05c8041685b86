//! Election results engine.
//!
//! Raw result feeds, district metadata and a supplemental store are fetched
//! (through a cache), reconciled into one [`Election`] graph, tabulated, and
//! optionally checked against an independent count.

pub mod cache;
pub mod compute;
mod config;
pub mod errors;
pub mod fetch;
pub mod ids;
pub mod io_common;
pub mod io_counts;
pub mod io_districts;
pub mod io_results;
pub mod io_supplement;
pub mod pipeline;
pub mod resolve;
pub mod verify;

pub use crate::config::*;
pub use crate::errors::{EngineError, FetchError, Issue};
pub use crate::pipeline::{run_pipeline, PipelineOutput};
pub use crate::resolve::setup_records;
pub use crate::verify::{apply_corrections, verify, Verification, VerificationReport};
