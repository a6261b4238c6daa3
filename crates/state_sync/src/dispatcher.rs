use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::{
    delta::Delta,
    error::ConsumerFailure,
    registry::{ConsumerRegistry, RegistrationToken},
    store::StateStore,
    Consumer,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Single funnel for every delta coming off the daemon connection.
///
/// A dispatch cycle holds `cycle` for its whole duration, so merges and
/// deliveries are totally ordered. The store's write lock is released
/// before consumers run and the registry lock is only taken briefly, so
/// reads and registration changes never wait on a consumer.
pub struct Dispatcher {
    store: StateStore,
    registry: Mutex<ConsumerRegistry>,
    cycle: Mutex<()>,
    cycles: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            store: StateStore::new(),
            registry: Mutex::new(ConsumerRegistry::new()),
            cycle: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn get(&self, path: &str) -> Value {
        self.store.get(path)
    }

    pub fn register<C>(&self, consumer: &Arc<C>) -> RegistrationToken
    where
        C: Consumer + 'static,
    {
        let token = self.registry.lock().register(consumer);
        trace!(%token, consumer = consumer.name(), "consumer registered");
        token
    }

    pub fn register_dyn(&self, consumer: &Arc<dyn Consumer>) -> RegistrationToken {
        let token = self.registry.lock().register_dyn(consumer);
        trace!(%token, consumer = consumer.name(), "consumer registered");
        token
    }

    pub fn unregister(&self, token: RegistrationToken) -> bool {
        let removed = self.registry.lock().unregister(token);
        trace!(%token, removed, "consumer unregistered");
        removed
    }

    pub fn consumer_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Runs one dispatch cycle: merge, then deliver to every live consumer.
    pub fn on_notification(&self, delta: Delta) -> DispatchReport {
        let _cycle = self.cycle.lock();
        self.store.merge(&delta);

        let registrations = {
            let mut registry = self.registry.lock();
            registry.prune();
            registry.snapshot()
        };

        let mut report = DispatchReport::default();
        for (token, consumer) in registrations {
            if !self.registry.lock().contains(token) {
                report.skipped += 1;
                continue;
            }
            let Some(consumer) = consumer.upgrade() else {
                report.skipped += 1;
                continue;
            };
            match deliver(consumer.as_ref(), &delta, &self.store) {
                Ok(()) => report.delivered += 1,
                Err(failure @ ConsumerFailure::Returned { .. }) => {
                    warn!(%token, error = %failure, "consumer failed to apply delta");
                    report.failed += 1;
                }
                Err(failure @ ConsumerFailure::Panicked { .. }) => {
                    error!(%token, error = %failure, "consumer panicked while applying delta");
                    report.failed += 1;
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::AcqRel);
        trace!(
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "dispatch cycle complete"
        );
        report
    }
}

fn deliver(
    consumer: &dyn Consumer,
    delta: &Delta,
    store: &StateStore,
) -> Result<(), ConsumerFailure> {
    match catch_unwind(AssertUnwindSafe(|| consumer.consume(delta, store))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ConsumerFailure::Returned {
            consumer: consumer.name().to_string(),
            source,
        }),
        Err(payload) => Err(ConsumerFailure::Panicked {
            consumer: consumer.name().to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
