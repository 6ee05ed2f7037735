//! The command subscriber (C8, spec.md §4.8): the public entry point wiring
//! together the priority queue (C3), subscription registry (C5), worker
//! pool (C4), outbound dispatcher (C6) and interceptor chain (C7) behind the
//! connection manager and local command bus (spec.md §6).

mod dispatcher;
mod interceptors;
mod queue;
mod registry;
mod stream;
mod workers;

use std::sync::Arc;

use crate::collab::{CommandHandler, ConnectionManager, LocalCommand, LocalCommandBus, LocalCommandResult, Registration};
use crate::config::SubscriberConfig;
use crate::protocol::server::WireCommand;

use dispatcher::OutboundDispatcher;
use interceptors::InterceptorChain;
use queue::PriorityQueue;
use registry::SubscriptionRegistry;
use workers::WorkerPool;

/// Bridges a local command bus to a remote command-routing server: commands
/// pushed down the bidirectional stream are decoded, dispatched locally, and
/// acknowledged back over the wire; commands dispatched locally via
/// [`CommandSubscriber::dispatch`] are routed out through a unary call
/// (spec.md §1-§2).
pub struct CommandSubscriber {
    queue: Arc<PriorityQueue<WireCommand>>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<OutboundDispatcher>,
    interceptors: Arc<InterceptorChain>,
    local_bus: Arc<dyn LocalCommandBus>,
    workers: WorkerPool,
}

impl CommandSubscriber {
    /// Builds and starts a subscriber: spawns the worker pool and registers
    /// the reconnect/disconnect listeners that drive resubscription
    /// (spec.md §4.5, §4.8).
    pub fn start(
        config: SubscriberConfig,
        connection_manager: Arc<dyn ConnectionManager>,
        local_bus: Arc<dyn LocalCommandBus>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let queue = Arc::new(PriorityQueue::new());
        let registry = SubscriptionRegistry::new(connection_manager.clone(), queue.clone(), config.clone());
        let dispatcher = OutboundDispatcher::new(connection_manager.clone(), config.clone());
        let interceptors = InterceptorChain::new();

        let workers = WorkerPool::spawn(queue.clone(), registry.clone(), local_bus.clone(), config.clone());

        let subscriber = Arc::new(CommandSubscriber {
            queue,
            registry,
            dispatcher,
            interceptors,
            local_bus,
            workers,
        });

        let reconnect_registry = subscriber.registry.clone();
        connection_manager.add_reconnect_listener(Arc::new(move || {
            let registry = reconnect_registry.clone();
            tokio::spawn(async move { registry.resubscribe().await });
        }));

        let disconnect_registry = subscriber.registry.clone();
        connection_manager.add_disconnect_listener(Arc::new(move || {
            let registry = disconnect_registry.clone();
            tokio::spawn(async move { registry.unsubscribe_all().await });
        }));

        subscriber
    }

    /// Registers a local handler for `name` and emits a wire SUBSCRIBE.
    /// Cancelling the returned registration removes the local handler and
    /// emits a wire UNSUBSCRIBE (spec.md §4.5, §5).
    pub async fn subscribe(self: &Arc<Self>, name: &str, handler: Arc<dyn CommandHandler>) -> Box<dyn Registration> {
        let local_registration = self.local_bus.subscribe(name, handler);
        self.registry.subscribe(name.to_string()).await;

        Box::new(SubscribeRegistration {
            subscriber: self.clone(),
            name: name.to_string(),
            local_registration: Some(local_registration),
        })
    }

    /// Registers an interceptor run, in registration order, on every
    /// locally-dispatched command before it is routed out (spec.md §4.7).
    pub fn register_dispatch_interceptor(
        self: &Arc<Self>,
        interceptor: Arc<dyn Fn(LocalCommand) -> LocalCommand + Send + Sync>,
    ) -> Box<dyn Registration> {
        self.interceptors.register(interceptor)
    }

    /// Passes `interceptor` straight through to the local bus (spec.md §4.7:
    /// "handler interceptors are the local bus's concern; this crate only
    /// forwards the registration").
    pub fn register_handler_interceptor(
        self: &Arc<Self>,
        interceptor: Arc<dyn Fn(LocalCommand) -> LocalCommand + Send + Sync>,
    ) -> Box<dyn Registration> {
        self.local_bus.register_handler_interceptor(interceptor)
    }

    /// Applies the dispatch interceptor chain, then routes `command` out and
    /// invokes `callback` exactly once with the outcome (spec.md §4.6-§4.7).
    pub fn dispatch(self: &Arc<Self>, command: LocalCommand, callback: Box<dyn FnOnce(LocalCommandResult) + Send>) {
        let command = self.interceptors.apply(command);
        self.dispatcher.dispatch(command, callback);
    }

    /// Terminal shutdown: stops the worker pool and closes the inbound
    /// stream, unsubscribing everything over it first if one is open.
    /// `close` does both under one lock acquisition so the completion
    /// signal always reaches a stream that was open when shutdown began.
    pub async fn disconnect(self: &Arc<Self>) {
        self.workers.shutdown();
        self.registry.close().await;
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        self.registry.current_names()
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }
}

struct SubscribeRegistration {
    subscriber: Arc<CommandSubscriber>,
    name: String,
    local_registration: Option<Box<dyn Registration>>,
}

impl Registration for SubscribeRegistration {
    fn cancel(mut self: Box<Self>) {
        if let Some(local) = self.local_registration.take() {
            local.cancel();
        }
        let subscriber = self.subscriber.clone();
        let name = self.name.clone();
        tokio::spawn(async move { subscriber.registry.unsubscribe(&name).await });
    }
}
