// ============================================================================
// Cache Module - read-through caching hardened against miss storms
// ============================================================================

mod errors;
mod guard;

pub use errors::CacheError;
pub use guard::{CacheConfig, CacheGuard};
