//! Observability for the registry gate.
//!
//! Metric definitions and recording helpers; tracing is configured in `main`.

pub mod metrics;
