use std::time::Duration;

use crate::utils::IsTransient;

/// Failure of a lock-guarded section.
///
/// `Contention` means the lease could not be obtained in time and the body
/// never ran. `Body` carries the body's own error untouched.
#[derive(Debug, thiserror::Error)]
pub enum GuardedError<E> {
    #[error("System busy, please retry: lock {key} not acquired within {waited:?}")]
    Contention { key: String, waited: Duration },

    #[error("Lock store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("{0}")]
    Body(E),
}

impl<E> GuardedError<E> {
    pub fn is_contention(&self) -> bool {
        matches!(self, GuardedError::Contention { .. })
    }
}

impl<E> IsTransient for GuardedError<E> {
    fn is_transient(&self) -> bool {
        self.is_contention()
    }
}
