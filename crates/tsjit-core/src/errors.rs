use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The transformation engine failed; fatal to this file's load only
    #[error("Failed to transform {}: {source}", path.display())]
    Engine {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Writing the artifact failed
    #[error("Failed to persist transform of {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: CacheError,
    },
}

impl TransformError {
    pub(crate) fn engine(path: PathBuf, error: anyhow::Error) -> Self {
        TransformError::Engine {
            path,
            source: error.into(),
        }
    }
}
