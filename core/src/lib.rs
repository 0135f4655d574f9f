#![deny(missing_docs)]
//! ka_core: shared building blocks (config, PID marker, logging).

/// Configuration helpers (AppId, dirs, load_or_init, validation).
pub mod cfg;
/// Tracing/log initialization and rotating file writers.
pub mod logx;
/// Single-instance PID marker and process liveness probes.
pub mod pidfile;
