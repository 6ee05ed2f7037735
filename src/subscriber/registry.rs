//! Subscription registry & resubscriber (C5, spec.md §4.5). Owns the wire
//! view of "what commands can this client handle" and the stream handle's
//! lazy-creation critical section.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::collab::{CallMetadata, ConnectionManager, InboundObserver, ServerPush, TransportError, TransportStatus};
use crate::config::SubscriberConfig;
use crate::error::CommandChannelError;
use crate::protocol::client::{ClientMessage, SubscribeMessage, UnsubscribeMessage};
use crate::subscriber::queue::PriorityQueue;
use crate::subscriber::stream::FlowControlledSender;

/// Mirrors spec.md §4.8's state machine: `None` -> `Opening` -> `Open`, with
/// `Closed` as the terminal state after `disconnect()`.
enum StreamState {
    None,
    Opening,
    Open(Arc<FlowControlledSender>),
    Closed,
}

pub struct SubscriptionRegistry {
    names: RwLock<HashSet<String>>,
    subscribing: AtomicBool,
    stream: AsyncMutex<StreamState>,
    connection_manager: Arc<dyn ConnectionManager>,
    queue: Arc<PriorityQueue<crate::protocol::server::WireCommand>>,
    config: Arc<SubscriberConfig>,
}

impl SubscriptionRegistry {
    pub fn new(
        connection_manager: Arc<dyn ConnectionManager>,
        queue: Arc<PriorityQueue<crate::protocol::server::WireCommand>>,
        config: Arc<SubscriberConfig>,
    ) -> Arc<Self> {
        Arc::new(SubscriptionRegistry {
            names: RwLock::new(HashSet::new()),
            subscribing: AtomicBool::new(false),
            stream: AsyncMutex::new(StreamState::None),
            connection_manager,
            queue,
            config,
        })
    }

    /// Lazily creates the stream if needed, serialized so at most one
    /// creator is ever in flight (spec.md §4.5, §9). Holds the lock across
    /// the whole create-and-store sequence so no reader can observe a
    /// stream without its initial credit grant. `Closed` is terminal
    /// (SPEC_FULL.md §4.8's state machine): once `disconnect()` has run, no
    /// caller -- `subscribe`, `unsubscribe`, `resubscribe`, a racing worker --
    /// may resurrect the stream.
    pub async fn ensure_stream(self: &Arc<Self>) -> Result<Arc<FlowControlledSender>, CommandChannelError> {
        let mut guard = self.stream.lock().await;

        match &*guard {
            StreamState::Open(sender) => return Ok(sender.clone()),
            StreamState::Closed => return Err(CommandChannelError::ShuttingDown),
            StreamState::None | StreamState::Opening => {}
        }

        *guard = StreamState::Opening;

        let observer: Arc<dyn InboundObserver> = Arc::new(InboundRelay {
            queue: self.queue.clone(),
            registry: Arc::downgrade(self),
        });

        let metadata = CallMetadata {
            token: self.config.token.clone(),
            context: self.config.context.clone(),
        };
        let raw_sink = match self.connection_manager.open_command_stream(observer, metadata).await {
            Ok(sink) => sink,
            Err(err) => {
                *guard = StreamState::None;
                return Err(err.into());
            }
        };

        let sender = match FlowControlledSender::open(
            raw_sink,
            self.config.initial_permits,
            self.config.new_permits,
            self.config.new_permits_threshold,
        )
        .await
        {
            Ok(sender) => sender,
            Err(err) => {
                *guard = StreamState::None;
                return Err(err.into());
            }
        };

        *guard = StreamState::Open(sender.clone());
        Ok(sender)
    }

    /// Adds `name` to the registry and sends a SUBSCRIBE. Failures are
    /// tolerated: the name stays subscribed locally and `resubscribe` (here,
    /// called again immediately rather than waiting for the next reconnect
    /// -- spec.md §9's redesign) will retry it.
    pub async fn subscribe(self: &Arc<Self>, name: String) {
        self.names.write().insert(name.clone());
        self.subscribing.store(true, Ordering::SeqCst);

        let result = self.send_subscribe(&name).await;
        self.subscribing.store(false, Ordering::SeqCst);

        if result.is_err() {
            log::debug!(target: "cmdlink", "subscribe send failed for {name}, re-entering resubscribe");
            self.resubscribe().await;
        }
    }

    async fn send_subscribe(self: &Arc<Self>, name: &str) -> Result<(), CommandChannelError> {
        let sender = self.ensure_stream().await?;
        let message = SubscribeMessage::new(name, self.config.client_id.clone(), self.config.component_name.clone());
        sender.send(ClientMessage::Subscribe(message)).await?;
        Ok(())
    }

    /// Removes `name` and best-effort sends an UNSUBSCRIBE; send failures
    /// are ignored (spec.md §4.5).
    pub async fn unsubscribe(self: &Arc<Self>, name: &str) {
        self.names.write().remove(name);

        if let Ok(sender) = self.ensure_stream().await {
            let message = UnsubscribeMessage::new(name, self.config.client_id.clone());
            let _ = sender.send(ClientMessage::Unsubscribe(message)).await;
        }
    }

    /// Invoked by the connection manager on every successful (re)connect.
    /// No-ops if the registry is empty or a `subscribe` call is already in
    /// flight, per spec.md §4.5.
    pub async fn resubscribe(self: &Arc<Self>) {
        if self.subscribing.load(Ordering::SeqCst) {
            return;
        }

        let names: Vec<String> = self.names.read().iter().cloned().collect();
        if names.is_empty() {
            return;
        }

        let sender = match self.ensure_stream().await {
            Ok(sender) => sender,
            Err(err) => {
                log::debug!(target: "cmdlink", "resubscribe could not open stream: {err}");
                return;
            }
        };

        for name in names {
            let message = SubscribeMessage::new(&name, self.config.client_id.clone(), self.config.component_name.clone());
            if let Err(err) = sender.send(ClientMessage::Subscribe(message)).await {
                log::debug!(target: "cmdlink", "resubscribe send failed for {name}: {err}");
            }
        }
    }

    /// Invoked on disconnect notifications: best-effort UNSUBSCRIBE for
    /// every name, then null the stream handle so the next access
    /// re-creates it.
    pub async fn unsubscribe_all(self: &Arc<Self>) {
        let names: Vec<String> = self.names.read().iter().cloned().collect();

        if let Ok(sender) = self.ensure_stream().await {
            for name in names {
                let message = UnsubscribeMessage::new(&name, self.config.client_id.clone());
                let _ = sender.send(ClientMessage::Unsubscribe(message)).await;
            }
        }

        let mut guard = self.stream.lock().await;
        if !matches!(*guard, StreamState::Closed) {
            *guard = StreamState::None;
        }
    }

    /// Terminal shutdown: best-effort UNSUBSCRIBE for every subscribed name
    /// and the completion signal both go out over the same sender under one
    /// lock acquisition, so a stream that's open when this starts can't be
    /// nulled out from under it before the completion signal is sent. A
    /// closed handle never reopens.
    pub async fn close(self: &Arc<Self>) {
        let mut guard = self.stream.lock().await;
        if let StreamState::Open(sender) = &*guard {
            let names: Vec<String> = self.names.read().iter().cloned().collect();
            for name in names {
                let message = UnsubscribeMessage::new(&name, self.config.client_id.clone());
                let _ = sender.send(ClientMessage::Unsubscribe(message)).await;
            }
            sender.close().await;
        }
        *guard = StreamState::Closed;
    }

    pub fn current_names(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }
}

/// The inbound observer installed on every stream creation (spec.md §4.5):
/// forwards `Command` pushes to the priority queue, and drives reconnection
/// on error/completion.
struct InboundRelay {
    queue: Arc<PriorityQueue<crate::protocol::server::WireCommand>>,
    registry: Weak<SubscriptionRegistry>,
}

impl InboundObserver for InboundRelay {
    fn on_next(&self, message: ServerPush) {
        if let ServerPush::Command(wire) = message {
            let priority = wire.priority();
            self.queue.push(priority, wire);
        }
    }

    fn on_error(&self, error: TransportError) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        // Clear eagerly so a subsequent `ensure_stream` doesn't see a stale
        // `Open` handle while the async reset/resubscribe below is pending.
        // `Closed` is terminal: an observer from a stream that was open
        // before `disconnect()` must not resurrect it.
        let reset = registry.clone();
        tokio::spawn(async move {
            let mut guard = reset.stream.lock().await;
            if matches!(*guard, StreamState::Closed) {
                return;
            }
            *guard = StreamState::None;
            drop(guard);

            if error.status != TransportStatus::Unavailable {
                reset.resubscribe().await;
            }
            // UNAVAILABLE: the connection manager drives reconnection and
            // will invoke `resubscribe` itself once reconnected.
        });
    }

    fn on_completed(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let mut guard = registry.stream.lock().await;
            if !matches!(*guard, StreamState::Closed) {
                *guard = StreamState::None;
            }
        });
    }
}
