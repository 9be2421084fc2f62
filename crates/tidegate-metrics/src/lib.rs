//! tidegate-metrics: read-only observability for the admin plane.
//!
//! ```text
//! AdminService::metrics() → AdminMetrics (polled, never pushed)
//!   └── render_prometheus() → text/plain for the /metrics endpoint
//! ```

pub mod prometheus;
pub mod snapshot;

pub use prometheus::render_prometheus;
pub use snapshot::{AdminMetrics, DomainVersion, JobRun};
