use posecraft_backends::BackendError;
use posecraft_core::error::CoreError;
use posecraft_db::StoreError;

/// Anything that can go wrong while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Storage failures abort the whole run; nothing else can be recorded
    /// safely once the store is unreliable. Everything else is contained at
    /// the variant boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
