use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::protocol::server::{WireCommand, WireOutcome};

/// Client-originated wire messages: every frame the subscriber writes to
/// the bidirectional stream, or issues as a unary dispatch call, carries
/// exactly one of these.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Subscribe(SubscribeMessage),
    Unsubscribe(UnsubscribeMessage),
    CommandResponse(CommandResponseMessage),
    FlowControl(FlowControlMessage),
    /// A locally-originated command sent for routing and execution
    /// elsewhere -- carried over the unary dispatch call, never over the
    /// inbound command stream.
    DispatchCommand(WireCommand),
}

#[derive(Debug, Clone)]
pub struct SubscribeMessage {
    pub command_name: String,
    pub client_id: String,
    pub component_name: String,
    pub message_id: String,
}

impl SubscribeMessage {
    pub fn new(command_name: impl Into<String>, client_id: impl Into<String>, component_name: impl Into<String>) -> Self {
        SubscribeMessage {
            command_name: command_name.into(),
            client_id: client_id.into(),
            component_name: component_name.into(),
            message_id: generate_message_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnsubscribeMessage {
    pub command_name: String,
    pub client_id: String,
    pub message_id: String,
}

impl UnsubscribeMessage {
    pub fn new(command_name: impl Into<String>, client_id: impl Into<String>) -> Self {
        UnsubscribeMessage {
            command_name: command_name.into(),
            client_id: client_id.into(),
            message_id: generate_message_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponseMessage {
    pub request_id: String,
    pub message_id: String,
    pub outcome: WireOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowControlMessage {
    pub permits: u32,
}

/// Generates a message identifier: a short random alphanumeric string,
/// cheap enough to call on every message without a shared counter.
pub fn generate_message_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
