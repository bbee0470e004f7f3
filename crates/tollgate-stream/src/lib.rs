//! Tollgate Stream - the client-facing event protocol and connection driver.
//!
//! - [`StreamEvent`] / [`SseFrame`]: the closed wire vocabulary and its
//!   `data: {json}` framing, terminated by the `[DONE]` sentinel
//! - [`Translator`]: turns the engine's raw trace into protocol events,
//!   hiding internal nodes and tracking in-flight tool calls
//! - [`TranslatorRepository`]: one long-lived translator per thread
//! - [`StreamService`]: serves start-turn, approval and stop requests with
//!   cooperative cancellation and a guaranteed terminal frame
//! - [`config_bridge`]: builds all of the above from `tollgate_config::Config`
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tollgate_core::ThreadId;
//! use tollgate_runtime::TraceEvent;
//! use tollgate_stream::{NodeRoles, SseFrame, Translator};
//!
//! let roles = NodeRoles::new().with_internal(["grade_documents"]);
//! let mut translator = Translator::new(ThreadId::from("thread-1"), Arc::new(roles));
//!
//! assert!(translator.translate(&TraceEvent::token("grade_documents", "yes")).is_empty());
//!
//! let events = translator.translate(&TraceEvent::token("assistant", "Hello"));
//! let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
//! assert_eq!(types, ["assistant_start", "assistant_token"]);
//!
//! let frame = SseFrame::encode(events[1].clone()).unwrap();
//! assert!(frame.to_wire().starts_with("data: {\"type\":\"assistant_token\""));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod config_bridge;
pub mod error;
pub mod event;
pub mod repository;
pub mod request;
pub mod service;
pub mod sink;
pub mod translator;

pub use error::{StreamError, StreamResult};
pub use event::{DONE_SENTINEL, ErrorCode, SseFrame, StreamEvent};
pub use repository::{RequestKind, TranslatorLease, TranslatorRepository};
pub use request::{ApprovalResponse, STOP_STATUS, StartTurn, StopAck, StopRequest};
pub use service::{ConnectionOutcome, ConnectionReport, Housekeeping, StreamService, StreamSettings};
pub use sink::{ChannelSink, EventSink};
pub use translator::{NodeRoles, Translator};
