//! Process-wide printer state and the dispatch of daemon deltas to display
//! consumers.
//!
//! One [`Dispatcher`] is built at startup and shared by `Arc` with the
//! connection and every panel. Each notification runs one dispatch cycle:
//! the delta is merged into the [`StateStore`], then handed to every
//! registered [`Consumer`] while the cycle lock is held.

mod delta;
mod dispatcher;
pub mod error;
mod registry;
mod store;

pub use delta::Delta;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{ConsumerFailure, DeltaError};
pub use registry::{ConsumerRegistry, RegistrationToken};
pub use store::StateStore;

pub use serde_json::Value;
pub use shared::StatePath;

/// Capability every display panel implements to receive live deltas.
///
/// `consume` runs inside the dispatch cycle on the connection's receive
/// path. It must return quickly and must not block on I/O. `state` is
/// already merged with `delta` and may be read freely.
pub trait Consumer: Send + Sync {
    fn consume(&self, delta: &Delta, state: &StateStore) -> anyhow::Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
