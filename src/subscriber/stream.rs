//! Flow-controlled stream wrapper. Wraps the raw [`OutboundSink`] handed
//! back by the connection manager, injecting credit-replenishment messages
//! every `new_permits_threshold` acknowledged inbound responses, and
//! serializing all writes on one lock -- `tokio::sync::Mutex` rather than a
//! sync mutex since the critical section spans an `await` (the actual
//! network write).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::collab::{OutboundSink, TransportError};
use crate::protocol::client::{ClientMessage, FlowControlMessage};

pub struct FlowControlledSender {
    sink: Arc<dyn OutboundSink>,
    /// Guards ordering of writes only; the counter below is what decides
    /// *when* to write a grant, so it can be a plain atomic even though
    /// sends are serialized through this lock.
    write_lock: Mutex<()>,
    ack_count: AtomicU64,
    new_permits: u32,
    new_permits_threshold: u64,
}

impl FlowControlledSender {
    /// Wraps `sink` and sends the initial permit grant before returning, so
    /// that every caller who observes this handle sees a stream that
    /// already has credit.
    pub async fn open(
        sink: Arc<dyn OutboundSink>,
        initial_permits: u32,
        new_permits: u32,
        new_permits_threshold: u64,
    ) -> Result<Arc<Self>, TransportError> {
        let wrapper = Arc::new(FlowControlledSender {
            sink,
            write_lock: Mutex::new(()),
            ack_count: AtomicU64::new(0),
            new_permits,
            new_permits_threshold,
        });

        wrapper
            .write(ClientMessage::FlowControl(FlowControlMessage {
                permits: initial_permits,
            }))
            .await?;

        Ok(wrapper)
    }

    /// Sends any client message, serialized with respect to every other
    /// sender of this stream.
    pub async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.write(message).await
    }

    /// Sends a command response and, if this crosses the threshold, a
    /// follow-up permit grant -- both under the same write-lock acquisition
    /// so the two sends can never be interleaved with another sender's
    /// response.
    pub async fn send_response(&self, message: ClientMessage) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        self.sink.send(message).await?;

        let count = self.ack_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count % self.new_permits_threshold == 0 {
            self.sink
                .send(ClientMessage::FlowControl(FlowControlMessage {
                    permits: self.new_permits,
                }))
                .await?;
        }

        Ok(())
    }

    async fn write(&self, message: ClientMessage) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        self.sink.send(message).await
    }

    pub async fn close(&self) {
        self.sink.close().await;
    }
}
