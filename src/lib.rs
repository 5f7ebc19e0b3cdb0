//! Trade Gate: per-strategy trade risk gate
//!
//! Root crate for benchmarks and cross-crate tests. For actual functionality,
//! use the individual crates directly:
//!
//! - `gate-core`: Shared types, limits configuration, database helpers
//! - `risk-gate`: Pre-trade checks, circuit breakers, trailing and stagnation exits
//! - `gate-replay`: JSON-lines replay driver

// Re-export for benchmarks
pub use gate_core as core;
pub use risk_gate as risk;
