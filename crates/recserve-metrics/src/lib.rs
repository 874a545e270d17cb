//! recserve-metrics: observability for the serving core.
//!
//! # Architecture
//!
//! ```text
//! MetricsSink (trait)                 ← what the version manager reports to
//!   └── MetricsCollector
//!         ├── record_switch()         ← one increment per switch attempt
//!         ├── set_current_version()   ← active version gauge
//!         ├── record_request()        ← called per /recommend request
//!         └── record_shadow()         ← background shadow outcomes
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;
pub mod sink;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;
pub use sink::{MetricsSink, SwitchStatus, VersionLabels};
