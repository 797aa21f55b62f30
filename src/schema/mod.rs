//! Schema module - Configuration and report types for MAP-Elites runs.

mod config;
mod report;

pub use config::*;
pub use report::*;
