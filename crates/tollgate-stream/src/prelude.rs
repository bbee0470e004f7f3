//! Convenience re-exports for downstream crates.
//!
//! ```
//! use tollgate_stream::prelude::*;
//! ```

pub use crate::error::{StreamError, StreamResult};
pub use crate::event::{ErrorCode, SseFrame, StreamEvent};
pub use crate::request::{ApprovalResponse, StartTurn, StopAck, StopRequest};
pub use crate::service::{ConnectionOutcome, ConnectionReport, StreamService, StreamSettings};
pub use crate::sink::{ChannelSink, EventSink};
pub use crate::translator::{NodeRoles, Translator};
