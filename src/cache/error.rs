use thiserror::Error;

/// Failures produced by the store's own mechanics.
///
/// Factory failures are not represented here: they reach every waiter as the
/// factory's own error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cached value for key `{key}` is not a `{expected}`")]
    ValueTypeMismatch { key: String, expected: &'static str },
    #[error("computation for key `{key}` aborted before producing a result")]
    ComputationAborted { key: String },
}

impl CacheError {
    pub(crate) fn type_mismatch<T>(key: &str) -> Self {
        Self::ValueTypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn aborted(key: &str) -> Self {
        Self::ComputationAborted {
            key: key.to_string(),
        }
    }
}
