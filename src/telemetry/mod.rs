// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`, installed with [`init_telemetry`]
//! - **Metrics**: in-process counters and latency histograms in [`GLOBAL_METRICS`]
//!
//! Metric names used by the crate:
//!
//! | name | recorded by |
//! |------|-------------|
//! | `context.add_message` | every accepted append |
//! | `context.format_turn` | building a compressed provider payload |
//! | `compression.strategy` | each strategy run in the pipeline |
//! | `session.create` / `session.load` | the session manager |
//! | `storage.sqlite.*` | SQLite store operations |
//!
//! Timing is only collected with the `telemetry` feature enabled.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
