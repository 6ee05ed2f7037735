//! Dispatch interceptor chain (C7, spec.md §4.7): a registration-ordered
//! chain of transforms applied to every locally-dispatched command before it
//! reaches [`crate::subscriber::dispatcher::OutboundDispatcher`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::collab::{LocalCommand, Registration};

type Interceptor = Arc<dyn Fn(LocalCommand) -> LocalCommand + Send + Sync>;

#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<(u64, Interceptor)>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InterceptorChain {
    pub fn new() -> Arc<Self> {
        Arc::new(InterceptorChain::default())
    }

    /// Registers `interceptor` at the end of the chain. Interceptors run in
    /// registration order (spec.md §10.2's redesign decision), each seeing
    /// the output of the one before it.
    pub fn register(self: &Arc<Self>, interceptor: Interceptor) -> Box<dyn Registration> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.interceptors.write().push((id, interceptor));

        Box::new(InterceptorRegistration {
            chain: self.clone(),
            id,
        })
    }

    /// Runs `command` through every registered interceptor in order.
    pub fn apply(&self, command: LocalCommand) -> LocalCommand {
        let interceptors = self.interceptors.read();
        interceptors.iter().fold(command, |current, (_, interceptor)| interceptor(current))
    }
}

struct InterceptorRegistration {
    chain: Arc<InterceptorChain>,
    id: u64,
}

impl Registration for InterceptorRegistration {
    fn cancel(self: Box<Self>) {
        self.chain.interceptors.write().retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn command(name: &str) -> LocalCommand {
        LocalCommand {
            name: name.into(),
            payload: bytes::Bytes::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn interceptors_run_in_registration_order() {
        let chain = InterceptorChain::new();
        chain.register(Arc::new(|mut c: LocalCommand| {
            c.metadata.insert("order".into(), "1".into());
            c
        }));
        chain.register(Arc::new(|mut c: LocalCommand| {
            c.metadata.insert("order".into(), "2".into());
            c
        }));

        let result = chain.apply(command("Thing"));
        assert_eq!(result.metadata.get("order"), Some(&"2".to_string()));
    }

    #[test]
    fn cancelled_interceptor_stops_running() {
        let chain = InterceptorChain::new();
        let registration = chain.register(Arc::new(|mut c: LocalCommand| {
            c.metadata.insert("touched".into(), "yes".into());
            c
        }));
        registration.cancel();

        let result = chain.apply(command("Thing"));
        assert_eq!(result.metadata.get("touched"), None);
    }
}
