//! Tollgate Telemetry - logging setup and request correlation.
//!
//! This crate provides:
//! - [`setup_logging`] over `tracing-subscriber` with four output formats
//! - [`RequestContext`], a per-connection span carrying the thread id
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), tollgate_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Json)
//!     .with_directive("tollgate_stream=trace");
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("stream")
//!     .with_operation("start_turn")
//!     .with_thread_id("thread-1");
//! let _guard = ctx.span().entered();
//! tracing::info!("connection opened");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_logging};
