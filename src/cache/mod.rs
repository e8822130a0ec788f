//! Portal Query Cache
//!
//! Session-scoped query orchestration for the catalog views:
//!
//! - **Keys**: canonical identities derived from raw view parameters
//! - **Store**: one entry per key with status, data and a request token
//! - **Scheduler**: single-flight, last-request-wins fetching
//! - **Debounce**: quiet-window settling of text inputs
//! - **Chain**: dependent stages driven by an upstream entry
//! - **Retention**: previous data shown as stale while a new key loads
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `portal.toml`:
//!
//! ```toml
//! [cache]
//! search_debounce_ms = 350
//! location_debounce_ms = 300
//! characters_stale_ms = 30000
//! retry_attempts = 0
//! # ... see config.rs for all options
//! ```

mod chain;
mod config;
mod debounce;
mod events;
mod keys;
mod retention;
mod scheduler;
mod store;

pub use chain::{DependencyEdge, DependentStage, Edge, StageState};
pub use config::CacheConfig;
pub use debounce::Debouncer;
pub use events::{CacheEvent, Epoch, EventBus, EventKind, Subscription};
pub use keys::{
    CharacterParams, EpisodeParams, FIRST_PAGE, Filter, KeyParams, LocationId,
    LocationSearchParams, QueryKey, RelationSet, build_key, hash_value, normalize_page,
};
pub use retention::{QueryView, StaleRetention};
pub use scheduler::{
    FetchFn, FetchHandle, FetchOutcome, FetchResult, FetchScheduler, FixedRetry, NoRetry,
    RetryHook,
};
pub use store::{CacheEntry, EntryPatch, QueryCache, QueryStatus, RequestToken};
