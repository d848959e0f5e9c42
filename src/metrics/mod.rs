//! Prometheus metrics for the Namespace Configuration Operator

pub mod prometheus;

pub use prometheus::*;
