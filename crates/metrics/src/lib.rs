//! Metric definitions for switchyard.
//!
//! Metrics are recorded through the `metrics` crate facade. Installing a
//! recorder/exporter is left to the host process; without one every call is
//! a no-op.
//!
//! ```rust,ignore
//! use switchyard_metrics::{counter, labels, mcp};
//!
//! counter!(mcp::TOOL_CALLS_TOTAL, labels::SERVER => "github").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
