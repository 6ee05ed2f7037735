use thiserror::Error;

/// Wire-stable error code taxonomy.
///
/// These three identifiers are the only failure kinds the wire protocol
/// knows about; everything the subscriber observes internally (decode
/// failure, transport failure, concurrency failure, other local-bus
/// failure) collapses onto one of these before it ever reaches the server
/// or an outbound caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Failure attributable to the transport or the client plumbing.
    CommandDispatchError,
    /// The local handler failed with a non-concurrency exception.
    CommandExecutionError,
    /// Optimistic-concurrency failure reported by the local model.
    ConcurrencyException,
}

impl ErrorCode {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ErrorCode::CommandDispatchError => "COMMAND_DISPATCH_ERROR",
            ErrorCode::CommandExecutionError => "COMMAND_EXECUTION_ERROR",
            ErrorCode::ConcurrencyException => "CONCURRENCY_EXCEPTION",
        }
    }
}

/// A classified remote or local failure, carrying a human-readable message
/// and (when available) the serialized form of the originating exception.
#[derive(Debug, Clone)]
pub struct ClassifiedException {
    pub code: ErrorCode,
    pub message: String,
    pub serialized_cause: Option<Vec<u8>>,
}

impl ClassifiedException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ClassifiedException {
            code,
            message: message.into(),
            serialized_cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Vec<u8>) -> Self {
        self.serialized_cause = Some(cause);
        self
    }
}

/// Top-level crate error. Only the paths that must surface a `Result` to a
/// caller use this; the outbound and inbound dispatch paths never throw --
/// they turn failures into `ClassifiedException` values instead.
#[derive(Debug, Error)]
pub enum CommandChannelError {
    /// Returned once `disconnect()` has moved the stream to its terminal
    /// `Closed` state -- shutdown never resurrects a stream.
    #[error("subscriber is shutting down")]
    ShuttingDown,

    #[error("transport error: {0}")]
    Transport(#[from] crate::collab::TransportError),

    #[error("configuration error: {0}")]
    Config(String),
}
