//! External collaborators: interfaces this crate consumes but does not
//! implement. Real deployments wire concrete connection managers, local
//! buses, routing strategies, priority calculators and serializers in here;
//! tests wire in-process mocks (see `tests/support`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::error::ClassifiedException;
use crate::protocol::server::{WireCommand, WireOutcome};

/// A locally-originated or locally-received command. Payload encoding is the
/// serializer's concern; this crate treats it as opaque bytes plus routing
/// metadata.
#[derive(Clone, Debug)]
pub struct LocalCommand {
    pub name: String,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
}

/// Outcome of running a [`LocalCommand`] through a handler or through the
/// wire: either a successful payload, or a classified exception.
#[derive(Clone, Debug)]
pub enum LocalCommandResult {
    Success(Bytes),
    Exceptional(ClassifiedException),
}

/// Transport-level status, coarse enough to distinguish "the connection
/// manager will reconnect on its own" (`Unavailable`) from any other error
/// that should trigger an immediate resubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Unavailable,
    Other,
}

#[derive(Debug, Error, Clone)]
#[error("transport error ({status:?}): {message}")]
pub struct TransportError {
    pub status: TransportStatus,
    pub message: String,
}

impl TransportError {
    pub fn new(status: TransportStatus, message: impl Into<String>) -> Self {
        TransportError {
            status,
            message: message.into(),
        }
    }
}

/// Per-call metadata the connection manager attaches as channel interceptor
/// headers on every stream/unary call this crate opens: an authentication
/// token and a routing context, both sourced from
/// [`crate::config::SubscriberConfig`]. This crate only carries the values
/// to the boundary -- turning them into actual transport headers is the
/// connection manager's concern.
#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub token: String,
    pub context: String,
}

/// A cancellable local registration (handler subscription, interceptor...).
/// Dropping it does not cancel; callers must call `cancel()` explicitly,
/// an explicit `unsubscribe` rather than RAII-on-drop.
pub trait Registration: Send + Sync {
    fn cancel(self: Box<Self>);
}

/// Observer driven by the connection manager for the long-lived,
/// bidirectional inbound stream. Exactly one of `on_next`, `on_error`,
/// `on_completed` fires per stream event.
pub trait InboundObserver: Send + Sync {
    fn on_next(&self, message: ServerPush);
    fn on_error(&self, error: TransportError);
    fn on_completed(&self);
}

/// The subset of server-pushed wire messages this crate acts on; any other
/// kind is ignored.
#[derive(Debug, Clone)]
pub enum ServerPush {
    Command(WireCommand),
    Other,
}

/// Observer driven by the connection manager for a single unary dispatch
/// call. Exactly one handler fires, exactly once. `on_next` carries the
/// decoded `command_response` envelope rather than raw bytes -- shaping
/// that envelope is this crate's concern (the protocol module), not the
/// transport's, so a remote-reported execution error arrives already
/// distinguishable from a successful payload.
pub trait DispatchObserver: Send + Sync {
    fn on_next(&self, response: WireOutcome);
    fn on_error(&self, error: TransportError);
    fn on_completed(&self);
}

/// A sink for client-originated wire messages, handed back by
/// [`ConnectionManager::open_command_stream`]. Implementations must accept
/// concurrent `send` calls without corrupting the underlying stream --
/// serialization is this trait's responsibility, not the caller's (the
/// flow-controlled wrapper is the only caller of `send` in this crate, and
/// it puts that discipline on its own write lock rather than relying on
/// this trait to provide it).
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, message: crate::protocol::client::ClientMessage) -> Result<(), TransportError>;
    /// Signals the server this side is done writing.
    async fn close(&self);
}

/// The connection manager: dials, multiplexes, and notifies of
/// connect/disconnect. This crate only consumes it; dialing and
/// reconnection live entirely on the other side of this trait.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Opens the bidirectional command stream, attaching `observer` to
    /// receive pushed frames, and returns the send half. `metadata` carries
    /// the per-call auth token and routing context headers.
    async fn open_command_stream(
        &self,
        observer: Arc<dyn InboundObserver>,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn OutboundSink>, TransportError>;

    /// Issues a single-request, single-response dispatch call.
    async fn open_dispatch_call(
        &self,
        request: crate::protocol::client::ClientMessage,
        observer: Arc<dyn DispatchObserver>,
        metadata: CallMetadata,
    );

    /// Registers a callback invoked after every successful (re)connect.
    fn add_reconnect_listener(&self, callback: Arc<dyn Fn() + Send + Sync>);

    /// Registers a callback invoked on every disconnect notification.
    fn add_disconnect_listener(&self, callback: Arc<dyn Fn() + Send + Sync>);
}

/// The in-process command bus: owns handler state, runs handlers, and
/// accepts interceptor registrations.
#[async_trait]
pub trait LocalCommandBus: Send + Sync {
    fn subscribe(&self, name: &str, handler: Arc<dyn CommandHandler>) -> Box<dyn Registration>;

    /// Dispatches `command` to whichever handler is registered for its name,
    /// invoking `callback` exactly once with the outcome.
    async fn dispatch(&self, command: LocalCommand, callback: Box<dyn FnOnce(LocalCommandResult) + Send>);

    fn register_handler_interceptor(&self, interceptor: HandlerInterceptor) -> Box<dyn Registration>;
}

/// A registered local handler for one command name.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: LocalCommand) -> LocalCommandResult;
}

pub type HandlerInterceptor = Arc<dyn Fn(LocalCommand) -> LocalCommand + Send + Sync>;

/// Pluggable routing-key strategy.
pub trait RoutingStrategy: Send + Sync {
    fn routing_key(&self, command: &LocalCommand) -> String;
}

/// Pluggable priority calculator.
pub trait PriorityCalculator: Send + Sync {
    fn priority(&self, command: &LocalCommand) -> i32;
}

/// Payload/exception (de)serialization. Kept separate from the wire codec,
/// which only shapes envelopes; this is what turns bytes into/out of those
/// envelopes' payload field.
pub trait Serializer: Send + Sync {
    fn serialize_exception(&self, exception: &ClassifiedException) -> Bytes;
    fn deserialize_exception(&self, bytes: &[u8]) -> Option<ClassifiedException>;
}
