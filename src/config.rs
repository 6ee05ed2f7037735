use std::sync::Arc;

use derive_builder::Builder;

use crate::collab::{PriorityCalculator, RoutingStrategy, Serializer};
use crate::error::CommandChannelError;

/// Immutable configuration for a [`crate::CommandSubscriber`].
///
/// A `Builder`-derived struct with a hand-rolled `build()` to enforce the
/// cross-field invariants `derive_builder` can't express on its own.
#[derive(Clone, Builder)]
#[builder(build_fn(skip), pattern = "owned")]
pub struct SubscriberConfig {
    /// Identity reported to the server for tracking.
    pub client_id: String,
    /// Logical service group this client belongs to.
    pub component_name: String,
    /// Per-call authentication token, attached as opaque metadata.
    pub token: String,
    /// Per-call routing context, attached as opaque metadata.
    pub context: String,
    /// Number of workers draining the inbound queue. Must be > 0.
    #[builder(default = "4")]
    pub command_threads: usize,
    /// Credits granted when a stream is first opened.
    #[builder(default = "64")]
    pub initial_permits: u32,
    /// Credits granted every time the threshold below is crossed.
    #[builder(default = "32")]
    pub new_permits: u32,
    /// Number of acknowledged responses after which a new grant is sent.
    /// Must be <= `initial_permits`.
    #[builder(default = "32")]
    pub new_permits_threshold: u64,
    #[builder(setter(custom))]
    pub routing_strategy: Arc<dyn RoutingStrategy>,
    #[builder(setter(custom))]
    pub priority_calculator: Arc<dyn PriorityCalculator>,
    /// Serializes the exceptions this crate itself raises (a panic in the
    /// decode/dispatch plumbing, a transport failure) into the cause bytes
    /// attached to the resulting `ClassifiedException`.
    #[builder(setter(custom))]
    pub serializer: Arc<dyn Serializer>,
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }
}

impl SubscriberConfigBuilder {
    pub fn routing_strategy(mut self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.routing_strategy = Some(strategy);
        self
    }

    pub fn priority_calculator(mut self, calculator: Arc<dyn PriorityCalculator>) -> Self {
        self.priority_calculator = Some(calculator);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Validates cross-field invariants and assembles the final config.
    ///
    /// `derive_builder`'s generated `build_fn` can't express
    /// `new_permits_threshold <= initial_permits`, so this is hand-written.
    pub fn build(self) -> Result<SubscriberConfig, CommandChannelError> {
        let command_threads = self.command_threads.unwrap_or(4);
        if command_threads == 0 {
            return Err(CommandChannelError::Config("command_threads must be > 0".into()));
        }

        let initial_permits = self.initial_permits.unwrap_or(64);
        let new_permits_threshold = self.new_permits_threshold.unwrap_or(32);
        if new_permits_threshold > initial_permits as u64 {
            return Err(CommandChannelError::Config(
                "new_permits_threshold must be <= initial_permits".into(),
            ));
        }

        Ok(SubscriberConfig {
            client_id: self
                .client_id
                .ok_or_else(|| CommandChannelError::Config("client_id must be initialized".into()))?,
            component_name: self
                .component_name
                .ok_or_else(|| CommandChannelError::Config("component_name must be initialized".into()))?,
            token: self.token.unwrap_or_default(),
            context: self.context.unwrap_or_default(),
            command_threads,
            initial_permits,
            new_permits: self.new_permits.unwrap_or(32),
            new_permits_threshold,
            routing_strategy: self
                .routing_strategy
                .ok_or_else(|| CommandChannelError::Config("routing_strategy must be initialized".into()))?,
            priority_calculator: self
                .priority_calculator
                .ok_or_else(|| CommandChannelError::Config("priority_calculator must be initialized".into()))?,
            serializer: self
                .serializer
                .ok_or_else(|| CommandChannelError::Config("serializer must be initialized".into()))?,
        })
    }
}
