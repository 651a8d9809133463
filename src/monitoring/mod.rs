pub mod events;
pub mod metrics;

pub use events::{EventBus, EventKind, EventListener, LifecycleEvent};
pub use metrics::try_init_prometheus;
