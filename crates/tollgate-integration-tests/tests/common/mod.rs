//! Shared helpers for integration tests.

#![allow(dead_code)]

use tollgate_core::{CallId, SuspensionId};
use tollgate_stream::StreamEvent;
use tollgate_test::RecordingSink;

/// The approval request the connection ended on, as
/// `(suspension, awaiting calls)`.
///
/// # Panics
///
/// Panics if the sink holds no approval request.
pub fn pending_approval(sink: &RecordingSink) -> (SuspensionId, Vec<CallId>) {
    sink.events()
        .into_iter()
        .find_map(|event| match event {
            StreamEvent::ApprovalRequest {
                suspension_id,
                context,
                ..
            } => Some((suspension_id, vec![context.tool_call_id])),
            StreamEvent::BatchApprovalRequest {
                suspension_id,
                requests,
                ..
            } => Some((
                suspension_id,
                requests.into_iter().map(|c| c.tool_call_id).collect(),
            )),
            _ => None,
        })
        .expect("no approval request was streamed")
}

/// Concatenated assistant token text.
pub fn streamed_text(sink: &RecordingSink) -> String {
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            StreamEvent::AssistantToken { content, .. } => Some(content),
            _ => None,
        })
        .collect()
}

/// Status reported in the `tool_complete` for `call_id`.
pub fn tool_status(sink: &RecordingSink, call_id: &str) -> Option<String> {
    sink.for_call(call_id).into_iter().find_map(|event| match event {
        StreamEvent::ToolComplete { status, .. } => Some(status.to_string()),
        _ => None,
    })
}
