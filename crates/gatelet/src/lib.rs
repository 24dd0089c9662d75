//! gatelet: distributed per-client admission control for serving fleets.

mod config;
mod context;
mod limiter;
mod registry;
mod stream;

pub mod logging;
pub mod store;

pub use config::LimiterSettings;
pub use context::{ContextError, ContextSlot, RecycleCounter, RequestContext};
pub use limiter::{AdmissionTicket, LimitError, RateLimit, UNLIMITED_REQUEST_ID};
pub use registry::LimiterRegistry;
pub use store::{CounterStore, MemoryStore, RedisStore, StoreError};
pub use stream::ReleasingStream;
