use std::path::PathBuf;

use thiserror::Error;

/// Startup failures. None of these are recoverable: the engine refuses to
/// build render state when any of them occurs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create window: {0}")]
    WindowCreation(String),

    #[error("failed to initialize GPU: {0}")]
    GpuInit(String),

    #[error("shader `{label}` failed to compile: {message}")]
    ShaderCompile { label: String, message: String },

    #[error("failed to load asset {}: {source:#}", .path.display())]
    AssetLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid scene description: {0:#}")]
    SceneConfig(#[source] anyhow::Error),
}

impl EngineError {
    pub fn asset(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self::AssetLoad {
            path: path.into(),
            source,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
