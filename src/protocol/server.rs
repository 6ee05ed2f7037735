use std::collections::HashMap;

use bytes::Bytes;

use crate::error::ErrorCode;

/// Processing instructions attached to an inbound command. Priority is the
/// only instruction this core interprets; the struct stays open to growth
/// rather than pinning a closed list.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingInstructions {
    pub priority: i32,
}

/// An inbound work item as it arrives from the server: opaque payload,
/// identifiers, routing key, processing instructions, metadata.
#[derive(Debug, Clone)]
pub struct WireCommand {
    pub message_id: String,
    pub command_name: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub instructions: ProcessingInstructions,
    pub metadata: HashMap<String, String>,
}

impl WireCommand {
    pub fn priority(&self) -> i32 {
        self.instructions.priority
    }
}

/// The outcome half of a `command_response` message: either a success
/// payload, or an error code, message, and the serialized form of the
/// originating exception when one was available (spec.md §4.4: "a runtime
/// exception... with the serialized exception attached").
#[derive(Debug, Clone)]
pub enum WireOutcome {
    Success(Bytes),
    Error {
        code: ErrorCode,
        message: String,
        cause: Option<Bytes>,
    },
}
