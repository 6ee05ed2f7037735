//! In-process mocks for `ConnectionManager` and `LocalCommandBus`, built
//! from `tokio::sync` channels, standing in for the real network transport
//! and handler registry in integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use cmdlink::{
    ClassifiedException, CommandHandler, ConnectionManager, ErrorCode, LocalCommand, LocalCommandBus, LocalCommandResult,
    PriorityCalculator, Registration, RoutingStrategy, Serializer,
};
use cmdlink::collab::{CallMetadata, DispatchObserver, InboundObserver, OutboundSink, ServerPush, TransportError, TransportStatus};
use cmdlink::protocol::{ClientMessage, WireOutcome};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Routes every command to a single fixed node with a fixed priority; tests
/// that care about priority ordering use `configurable_priority` instead.
pub struct FixedRouting {
    pub routing_key: String,
    pub priority: i32,
}

impl RoutingStrategy for FixedRouting {
    fn routing_key(&self, _command: &LocalCommand) -> String {
        self.routing_key.clone()
    }
}

impl PriorityCalculator for FixedRouting {
    fn priority(&self, _command: &LocalCommand) -> i32 {
        self.priority
    }
}

/// Serializes an exception's message as plain UTF-8 bytes; good enough for a
/// test collaborator, which only needs the cause to round-trip recognizably.
pub struct PlainTextSerializer;

impl Serializer for PlainTextSerializer {
    fn serialize_exception(&self, exception: &ClassifiedException) -> Bytes {
        Bytes::from(exception.message.clone().into_bytes())
    }

    fn deserialize_exception(&self, bytes: &[u8]) -> Option<ClassifiedException> {
        Some(ClassifiedException::new(
            ErrorCode::CommandDispatchError,
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }
}

/// What `open_dispatch_call` should do for a given outbound message, set up
/// by the test before exercising `dispatch`.
pub enum DispatchOutcome {
    Success(Bytes),
    /// The server-side router decoded and answered with an execution-level
    /// error envelope (spec.md §8 S4), as opposed to the transport itself
    /// failing (`Error` below).
    RemoteError { code: ErrorCode, message: String },
    Error(TransportError),
    CompleteWithoutResult,
}

struct ConnectionManagerState {
    observer: Option<Arc<dyn InboundObserver>>,
    reconnect_listeners: Vec<Arc<dyn Fn() + Send + Sync>>,
    disconnect_listeners: Vec<Arc<dyn Fn() + Send + Sync>>,
    next_stream_open_fails: bool,
    dispatch_outcome: Option<DispatchOutcome>,
    last_stream_metadata: Option<CallMetadata>,
    last_dispatch_metadata: Option<CallMetadata>,
}

/// A mock `ConnectionManager`. Every `send` on the sink it hands back is
/// recorded on `sent_rx` so a test can assert on what was written to the
/// wire; inbound pushes are simulated with `push_inbound`.
pub struct MockConnectionManager {
    state: Mutex<ConnectionManagerState>,
    sent_tx: mpsc::UnboundedSender<ClientMessage>,
    stream_closed: Arc<AtomicBool>,
}

impl MockConnectionManager {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(MockConnectionManager {
            state: Mutex::new(ConnectionManagerState {
                observer: None,
                reconnect_listeners: Vec::new(),
                disconnect_listeners: Vec::new(),
                next_stream_open_fails: false,
                dispatch_outcome: None,
                last_stream_metadata: None,
                last_dispatch_metadata: None,
            }),
            sent_tx,
            stream_closed: Arc::new(AtomicBool::new(false)),
        });
        (manager, sent_rx)
    }

    pub fn fail_next_stream_open(&self) {
        self.state.lock().next_stream_open_fails = true;
    }

    /// Whether the sink handed back by `open_command_stream` has had
    /// `close()` called on it.
    pub fn stream_closed(&self) -> bool {
        self.stream_closed.load(Ordering::SeqCst)
    }

    pub fn set_dispatch_outcome(&self, outcome: DispatchOutcome) {
        self.state.lock().dispatch_outcome = Some(outcome);
    }

    /// Simulates a server push arriving on the currently open stream.
    pub fn push_inbound(&self, message: ServerPush) {
        if let Some(observer) = self.state.lock().observer.clone() {
            observer.on_next(message);
        }
    }

    /// Simulates the stream failing with a transport error.
    pub fn fail_inbound(&self, error: TransportError) {
        if let Some(observer) = self.state.lock().observer.clone() {
            observer.on_error(error);
        }
    }

    /// Fires every callback registered via `add_reconnect_listener`.
    pub fn fire_reconnect(&self) {
        for callback in self.state.lock().reconnect_listeners.clone() {
            callback();
        }
    }

    /// Fires every callback registered via `add_disconnect_listener`.
    pub fn fire_disconnect(&self) {
        for callback in self.state.lock().disconnect_listeners.clone() {
            callback();
        }
    }

    /// The metadata the subscriber most recently passed to
    /// `open_command_stream`, for asserting the auth token/routing context
    /// configured on the subscriber actually reaches the connection manager.
    pub fn last_stream_metadata(&self) -> Option<CallMetadata> {
        self.state.lock().last_stream_metadata.clone()
    }

    pub fn last_dispatch_metadata(&self) -> Option<CallMetadata> {
        self.state.lock().last_dispatch_metadata.clone()
    }
}

#[async_trait]
impl ConnectionManager for MockConnectionManager {
    async fn open_command_stream(
        &self,
        observer: Arc<dyn InboundObserver>,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn OutboundSink>, TransportError> {
        let mut state = self.state.lock();
        state.last_stream_metadata = Some(metadata);
        if state.next_stream_open_fails {
            state.next_stream_open_fails = false;
            return Err(TransportError::new(TransportStatus::Other, "stream open refused"));
        }
        state.observer = Some(observer);
        Ok(Arc::new(MockOutboundSink {
            sent_tx: self.sent_tx.clone(),
            closed: self.stream_closed.clone(),
        }))
    }

    async fn open_dispatch_call(&self, request: ClientMessage, observer: Arc<dyn DispatchObserver>, metadata: CallMetadata) {
        self.state.lock().last_dispatch_metadata = Some(metadata);
        let _ = self.sent_tx.send(request);
        let outcome = self.state.lock().dispatch_outcome.take();
        match outcome {
            Some(DispatchOutcome::Success(payload)) => observer.on_next(WireOutcome::Success(payload)),
            Some(DispatchOutcome::RemoteError { code, message }) => observer.on_next(WireOutcome::Error { code, message, cause: None }),
            Some(DispatchOutcome::Error(error)) => observer.on_error(error),
            Some(DispatchOutcome::CompleteWithoutResult) | None => observer.on_completed(),
        }
    }

    fn add_reconnect_listener(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.state.lock().reconnect_listeners.push(callback);
    }

    fn add_disconnect_listener(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.state.lock().disconnect_listeners.push(callback);
    }
}

struct MockOutboundSink {
    sent_tx: mpsc::UnboundedSender<ClientMessage>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl OutboundSink for MockOutboundSink {
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let _ = self.sent_tx.send(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct HandlerRegistration {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn CommandHandler>>>>,
    name: String,
}

impl Registration for HandlerRegistration {
    fn cancel(self: Box<Self>) {
        self.handlers.lock().remove(&self.name);
    }
}

/// A mock `LocalCommandBus` backed by a name -> handler map.
pub struct MockLocalCommandBus {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn CommandHandler>>>>,
}

impl MockLocalCommandBus {
    pub fn new() -> Arc<Self> {
        Arc::new(MockLocalCommandBus {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl LocalCommandBus for MockLocalCommandBus {
    fn subscribe(&self, name: &str, handler: Arc<dyn CommandHandler>) -> Box<dyn Registration> {
        self.handlers.lock().insert(name.to_string(), handler);
        Box::new(HandlerRegistration {
            handlers: self.handlers.clone(),
            name: name.to_string(),
        })
    }

    async fn dispatch(&self, command: LocalCommand, callback: Box<dyn FnOnce(LocalCommandResult) + Send>) {
        let handler = self.handlers.lock().get(&command.name).cloned();
        match handler {
            Some(handler) => callback(handler.handle(command).await),
            None => callback(LocalCommandResult::Exceptional(ClassifiedException::new(
                ErrorCode::CommandDispatchError,
                format!("no handler registered for {}", command.name),
            ))),
        }
    }

    fn register_handler_interceptor(&self, _interceptor: cmdlink::collab::HandlerInterceptor) -> Box<dyn Registration> {
        Box::new(NoopRegistration)
    }
}

struct NoopRegistration;
impl Registration for NoopRegistration {
    fn cancel(self: Box<Self>) {}
}

/// A handler that always succeeds with a fixed payload.
pub struct EchoHandler {
    pub payload: Bytes,
}

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, _command: LocalCommand) -> LocalCommandResult {
        LocalCommandResult::Success(self.payload.clone())
    }
}
