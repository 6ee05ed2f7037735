//! Outbound dispatcher (C6, spec.md §4.6): sends a single locally-originated
//! command to the router and delivers exactly one outcome back to the
//! caller, regardless of which path (on_next, on_error, on_completed without
//! a prior on_next, a synchronous failure while preparing the call, or a
//! panic while issuing it) produces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collab::{CallMetadata, ConnectionManager, DispatchObserver, LocalCommand, LocalCommandResult, Serializer, TransportError};
use crate::config::SubscriberConfig;
use crate::error::{ClassifiedException, ErrorCode};
use crate::protocol::client::ClientMessage;
use crate::protocol::codec;
use crate::protocol::server::WireOutcome;

pub struct OutboundDispatcher {
    connection_manager: Arc<dyn ConnectionManager>,
    config: Arc<SubscriberConfig>,
}

impl OutboundDispatcher {
    pub fn new(connection_manager: Arc<dyn ConnectionManager>, config: Arc<SubscriberConfig>) -> Arc<Self> {
        Arc::new(OutboundDispatcher {
            connection_manager,
            config,
        })
    }

    /// Routes and prioritizes `command`, issues it as a unary dispatch call,
    /// and invokes `callback` exactly once. Preparation (routing key,
    /// priority, issuing the call) runs in its own task so that a panic
    /// there -- spec.md §8 S3's literal "stub factory throws
    /// RuntimeException" scenario -- is caught via the `JoinHandle` and
    /// synthesizes a `COMMAND_DISPATCH_ERROR` instead of either propagating
    /// to the caller of `dispatch` or silently dropping the callback
    /// (spec.md §4.6, §7, Testable Property #1).
    pub fn dispatch(self: &Arc<Self>, command: LocalCommand, callback: Box<dyn FnOnce(LocalCommandResult) + Send>) {
        let connection_manager = self.connection_manager.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let fired = Arc::new(AtomicBool::new(false));
            let relay = Arc::new(DispatchRelay {
                fired: fired.clone(),
                callback: std::sync::Mutex::new(Some(callback)),
                serializer: config.serializer.clone(),
            });

            let call_relay = relay.clone();
            let call_config = config.clone();
            let join = tokio::spawn(async move {
                let routing_key = call_config.routing_strategy.routing_key(&command);
                let priority = call_config.priority_calculator.priority(&command);
                let wire = codec::encode_command(&command, routing_key, priority);
                let message = ClientMessage::DispatchCommand(wire);
                let metadata = CallMetadata {
                    token: call_config.token.clone(),
                    context: call_config.context.clone(),
                };

                connection_manager.open_dispatch_call(message, call_relay, metadata).await;
            })
            .await;

            if let Err(join_error) = join {
                log::error!(target: "cmdlink", "dispatch panicked while preparing or issuing the call: {join_error}");
                relay.fire_with_message(format!("dispatch panicked: {join_error}"));
            }
        });
    }
}

/// Guarantees the callback fires exactly once no matter which of
/// `on_next`/`on_error`/`on_completed` arrives, using the same
/// compare-and-swap gate the teacher uses for its ack trigger.
struct DispatchRelay {
    fired: Arc<AtomicBool>,
    callback: std::sync::Mutex<Option<Box<dyn FnOnce(LocalCommandResult) + Send>>>,
    serializer: Arc<dyn Serializer>,
}

impl DispatchRelay {
    fn fire_once(&self, result: LocalCommandResult) {
        if self.fired.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        if let Some(callback) = self.callback.lock().expect("dispatch callback mutex poisoned").take() {
            callback(result);
        }
    }

    /// Builds a `COMMAND_DISPATCH_ERROR` out of a plain message, serializing
    /// it through the configured `Serializer` so the cause travels with the
    /// result the same way a remote-reported exception would (spec.md §4.4).
    fn fire_with_message(&self, message: impl Into<String>) {
        let exception = ClassifiedException::new(ErrorCode::CommandDispatchError, message.into());
        let cause = self.serializer.serialize_exception(&exception);
        self.fire_once(LocalCommandResult::Exceptional(exception.with_cause(cause.to_vec())));
    }
}

impl DispatchObserver for DispatchRelay {
    fn on_next(&self, response: WireOutcome) {
        self.fire_once(codec::decode_result(&response));
    }

    fn on_error(&self, error: TransportError) {
        self.fire_with_message(error.message);
    }

    fn on_completed(&self) {
        // A completion with no prior `on_next` means the call closed without
        // ever delivering a result: that is itself a dispatch error.
        self.fire_with_message("dispatch call completed without a response");
    }
}
