//! Worker pool (C4, spec.md §4.4): `command_threads` tasks draining the
//! priority queue, each decoding a [`WireCommand`], handing it to the local
//! bus, and writing the encoded result back over the flow-controlled stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::collab::LocalCommandBus;
use crate::config::SubscriberConfig;
use crate::error::{ClassifiedException, ErrorCode};
use crate::protocol::client::ClientMessage;
use crate::protocol::codec;
use crate::protocol::server::WireCommand;
use crate::subscriber::queue::PriorityQueue;
use crate::subscriber::registry::SubscriptionRegistry;

/// How long a worker waits on an empty queue before re-checking the
/// shutdown signal (spec.md §4.4: "a short, bounded poll, not an
/// unbounded blocking wait").
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawns `config.command_threads` workers, each looping until
    /// `shutdown` is signalled. A worker's panic during `process_one` is
    /// caught and logged; the worker keeps running (spec.md §4.4: "an
    /// interruption is a shutdown signal; any other failure inside a task is
    /// logged and the worker continues").
    pub fn spawn(
        queue: Arc<PriorityQueue<WireCommand>>,
        registry: Arc<SubscriptionRegistry>,
        local_bus: Arc<dyn LocalCommandBus>,
        config: Arc<SubscriberConfig>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for worker_index in 0..config.command_threads {
            let queue = queue.clone();
            let registry = registry.clone();
            let local_bus = local_bus.clone();
            let config = config.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        return;
                    }

                    let next = tokio::select! {
                        item = queue.poll(POLL_TIMEOUT) => item,
                        _ = shutdown_rx.changed() => return,
                    };

                    let Some(wire) = next else {
                        continue;
                    };

                    // Each item runs in its own task so a panic inside
                    // `process_one` only fails that task (observable as a
                    // `JoinError` here) instead of ending this worker's loop.
                    let request_id = wire.message_id.clone();
                    let task_registry = registry.clone();
                    let task_bus = local_bus.clone();
                    if let Err(join_error) = tokio::spawn(async move { process_one(&task_registry, &task_bus, wire).await }).await {
                        log::error!(
                            target: "cmdlink",
                            "worker {worker_index} panicked processing inbound command {request_id}: {join_error}"
                        );

                        // The plumbing itself failed rather than the handler
                        // reporting a classified outcome -- still answer the
                        // server so it doesn't wait out the call (spec.md §4.4),
                        // with the panic serialized and attached as the cause.
                        if let Ok(sender) = registry.ensure_stream().await {
                            let message = format!("worker panicked: {join_error}");
                            let exception = ClassifiedException::new(ErrorCode::CommandDispatchError, message.clone());
                            let cause = config.serializer.serialize_exception(&exception);
                            let response = codec::encode_dispatch_error(request_id.clone(), message, Some(cause));
                            if let Err(err) = sender.send_response(ClientMessage::CommandResponse(response)).await {
                                log::warn!(target: "cmdlink", "failed to send panic error response for {request_id}: {err}");
                            }
                        }
                    }
                }
            });
        }

        WorkerPool { shutdown: shutdown_tx }
    }

    /// Signals every worker to stop after its current item (spec.md §4.8).
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn process_one(registry: &Arc<SubscriptionRegistry>, local_bus: &Arc<dyn LocalCommandBus>, wire: WireCommand) {
    let request_id = wire.message_id.clone();
    let local = codec::decode_command(&wire);

    let sender = match registry.ensure_stream().await {
        Ok(sender) => sender,
        Err(err) => {
            log::warn!(target: "cmdlink", "dropping inbound command {request_id}, no stream available: {err}");
            return;
        }
    };

    let (result_tx, result_rx) = tokio::sync::oneshot::channel();
    local_bus
        .dispatch(
            local,
            Box::new(move |result| {
                let _ = result_tx.send(result);
            }),
        )
        .await;

    let Ok(result) = result_rx.await else {
        log::warn!(target: "cmdlink", "local bus dropped its callback for {request_id} without a result");
        return;
    };

    let response = codec::encode_result(&result, request_id);
    if let Err(err) = sender.send_response(ClientMessage::CommandResponse(response)).await {
        log::warn!(target: "cmdlink", "failed to send command response: {err}");
    }
}
