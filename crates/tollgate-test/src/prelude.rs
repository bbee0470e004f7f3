//! Convenience re-exports for tests.
//!
//! ```
//! use tollgate_test::prelude::*;
//! ```

pub use crate::engine::{ScriptedCall, ScriptedEngine, Step};
pub use crate::fixtures::{TestHarness, init_test_tracing, test_catalog, test_settings, test_thread_id};
pub use crate::sink::RecordingSink;
