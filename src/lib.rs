//! Client-side connector bridging a local command bus to a remote
//! command-routing server over a bidirectional streaming channel. The
//! connection, routing and (de)serialization concerns are pluggable
//! collaborators; this crate owns the wire codec, flow control, priority
//! dispatch, subscription lifecycle, and the worker pool that drains it.

pub mod collab;
pub mod config;
pub mod error;
pub mod protocol;
mod subscriber;

pub use collab::{
    CommandHandler, ConnectionManager, LocalCommand, LocalCommandBus, LocalCommandResult, PriorityCalculator,
    Registration, RoutingStrategy, Serializer,
};
pub use config::{SubscriberConfig, SubscriberConfigBuilder};
pub use error::{ClassifiedException, CommandChannelError, ErrorCode};
pub use subscriber::CommandSubscriber;
