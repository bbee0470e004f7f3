//! Convenience re-exports.
//!
//! ```
//! use tollgate_telemetry::prelude::*;
//! ```

pub use crate::{LogConfig, LogFormat, LogTarget, RequestContext, RequestGuard, setup_logging};
pub use crate::{TelemetryError, TelemetryResult};
