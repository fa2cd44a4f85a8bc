// ============================================================================
// Lock Module - per-key mutual exclusion with time-bounded leases
// ============================================================================

mod distributed_lock;
mod errors;

pub use distributed_lock::{DistributedLock, LockConfig, LockToken};
pub use errors::GuardedError;
