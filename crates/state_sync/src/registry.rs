use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::Consumer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationToken(u64);

impl RegistrationToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

struct Registration {
    token: RegistrationToken,
    consumer: Weak<dyn Consumer>,
}

/// Registered consumers, held by weak reference.
///
/// The owner of a consumer keeps it alive and unregisters it before
/// dropping it; a consumer dropped without unregistering is skipped and
/// pruned on the next pass.
#[derive(Default)]
pub struct ConsumerRegistry {
    next_token: u64,
    entries: Vec<Registration>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C>(&mut self, consumer: &Arc<C>) -> RegistrationToken
    where
        C: Consumer + 'static,
    {
        self.next_token += 1;
        let token = RegistrationToken(self.next_token);
        let consumer: Weak<dyn Consumer> = Arc::downgrade(consumer) as Weak<dyn Consumer>;
        self.entries.push(Registration { token, consumer });
        token
    }

    pub fn register_dyn(&mut self, consumer: &Arc<dyn Consumer>) -> RegistrationToken {
        self.next_token += 1;
        let token = RegistrationToken(self.next_token);
        self.entries.push(Registration {
            token,
            consumer: Arc::downgrade(consumer),
        });
        token
    }

    pub fn unregister(&mut self, token: RegistrationToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.token != token);
        self.entries.len() != before
    }

    pub fn contains(&self, token: RegistrationToken) -> bool {
        self.entries.iter().any(|entry| entry.token == token)
    }

    /// Drops registrations whose consumer no longer exists.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.consumer.strong_count() > 0);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.consumer.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Vec<(RegistrationToken, Weak<dyn Consumer>)> {
        self.entries
            .iter()
            .map(|entry| (entry.token, Weak::clone(&entry.consumer)))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
