use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Another caller is rebuilding this key and did not finish within the wait.
    #[error("System busy, please retry (cache rebuild of {key} in progress)")]
    Busy { key: String },

    #[error("Cache loader failed for {key}: {source}")]
    Loader {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cache store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl IsTransient for CacheError {
    fn is_transient(&self) -> bool {
        matches!(self, CacheError::Busy { .. })
    }
}
