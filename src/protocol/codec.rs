//! Wire codec. Pure functions: no I/O, no shared state, no panics. Decode
//! failure is represented as a value (`LocalCommandResult::Exceptional`),
//! never as an `Err` thrown back at a caller that expected a command or a
//! result.

use bytes::Bytes;

use crate::collab::{LocalCommand, LocalCommandResult};
use crate::error::{ClassifiedException, ErrorCode};
use crate::protocol::client::{generate_message_id, CommandResponseMessage};
use crate::protocol::server::{ProcessingInstructions, WireCommand, WireOutcome};

/// Attaches a routing key and a priority (as a processing instruction) to a
/// locally-originated command, producing the wire shape sent to the router.
pub fn encode_command(local: &LocalCommand, routing_key: String, priority: i32) -> WireCommand {
    WireCommand {
        message_id: generate_message_id(),
        command_name: local.name.clone(),
        routing_key,
        payload: local.payload.clone(),
        instructions: ProcessingInstructions { priority },
        metadata: local.metadata.clone(),
    }
}

/// Restores a local command from its wire shape, carrying metadata through
/// unchanged.
pub fn decode_command(wire: &WireCommand) -> LocalCommand {
    LocalCommand {
        name: wire.command_name.clone(),
        payload: wire.payload.clone(),
        metadata: wire.metadata.clone(),
    }
}

/// Encodes a local result as a `command_response` wire message, keyed on the
/// exception kind when the result is exceptional. Carries the exception's
/// serialized cause through unchanged, when the local bus attached one.
pub fn encode_result(result: &LocalCommandResult, request_id: String) -> CommandResponseMessage {
    let outcome = match result {
        LocalCommandResult::Success(payload) => WireOutcome::Success(payload.clone()),
        LocalCommandResult::Exceptional(exception) => WireOutcome::Error {
            code: exception.code,
            message: exception.message.clone(),
            cause: exception.serialized_cause.clone().map(Bytes::from),
        },
    };

    CommandResponseMessage {
        request_id,
        message_id: generate_message_id(),
        outcome,
    }
}

/// Encodes a `COMMAND_DISPATCH_ERROR` response directly, for failures that
/// never produced a `LocalCommandResult` at all -- a panic in the
/// decode/dispatch plumbing itself rather than a classified outcome from the
/// local bus. `cause` is the serialized exception the caller produced via the
/// `Serializer` collaborator (spec.md §4.4: "with the serialized exception
/// attached").
pub fn encode_dispatch_error(request_id: String, message: impl Into<String>, cause: Option<Bytes>) -> CommandResponseMessage {
    CommandResponseMessage {
        request_id,
        message_id: generate_message_id(),
        outcome: WireOutcome::Error {
            code: ErrorCode::CommandDispatchError,
            message: message.into(),
            cause,
        },
    }
}

/// Decodes a wire result into a local result. A malformed outcome (this
/// crate's `WireOutcome` can't actually be malformed once constructed, but a
/// real serializer-backed decode can fail) maps to an exceptional result
/// carrying `CommandDispatchError`, never an `Err`.
pub fn decode_result(outcome: &WireOutcome) -> LocalCommandResult {
    match outcome {
        WireOutcome::Success(payload) => LocalCommandResult::Success(payload.clone()),
        WireOutcome::Error { code, message, cause } => {
            let exception = ClassifiedException::new(*code, message.clone());
            let exception = match cause {
                Some(cause) => exception.with_cause(cause.to_vec()),
                None => exception,
            };
            LocalCommandResult::Exceptional(exception)
        }
    }
}
