//! Two-tier cache for incident media evidence.
//!
//! Video and image captures attached to incidents are held across two tiers:
//! a size-bounded in-memory [`session::SessionCache`] handing out revocable
//! [`session::MediaHandle`]s to a renderer, layered over a durable
//! [`store::PersistentStore`] with age-based retention. Misses fall through
//! to a [`fetch::MediaFetcher`] collaborator, and successful fetches are
//! written back to both tiers (durability first).

pub mod error;
pub mod fetch;
pub mod media;
pub mod session;
pub mod store;

pub use error::{CacheError, FetchError, Result};
pub use fetch::MediaFetcher;
pub use media::{CacheKey, DetectedEvent, IncidentDescriptor, MediaType};
pub use session::{
    HandleRegistry, InProcessRegistry, MediaHandle, SessionCache, SessionStats,
    SharedSessionCache, BATCH_WINDOW, DEFAULT_CAPACITY, DEFAULT_TTL,
};
pub use store::{CollectionStats, PersistentStore, StoreStats, DEFAULT_RETENTION};
