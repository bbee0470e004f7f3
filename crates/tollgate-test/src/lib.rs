//! Tollgate Test - shared test utilities for tollgate.
//!
//! This crate provides a scripted execution engine, a recording event sink
//! and a wired-up [`TestHarness`] for exercising the stream service end to
//! end without a model or a transport.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tollgate-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use tollgate_stream::StartTurn;
//! use tollgate_test::{RecordingSink, ScriptedEngine, Step, TestHarness};
//!
//! #[tokio::test]
//! async fn test_greeting() {
//!     let harness = TestHarness::new(ScriptedEngine::new().with_turn(vec![Step::say("hi there")]));
//!     let sink = RecordingSink::new();
//!     harness.service.start_turn(StartTurn::new("hello"), &sink).await;
//!     assert_eq!(sink.stream_ends(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod engine;
pub mod fixtures;
pub mod sink;

pub use engine::*;
pub use fixtures::*;
pub use sink::*;
