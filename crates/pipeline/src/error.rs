//! Error taxonomy shared by the export and waveform pipelines.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::EngineError;

/// Errors raised anywhere in the media pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Options could not be validated or normalized
    #[error("Invalid options: {0}")]
    Configuration(String),

    /// Source media does not exist
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source media exists but cannot be read
    #[error("Source not readable: {}", .0.display())]
    SourceAccessDenied(PathBuf),

    /// The transcoding engine failed
    #[error("Engine invocation failed: {0}")]
    EngineInvocation(#[from] EngineError),

    /// The requested audio track does not exist in the source
    #[error("Audio track {0} is not available")]
    UnsupportedTrackSelection(u32),

    /// Fewer decoded samples than requested output values
    #[error("Requested {requested} samples but only {available} are available")]
    InsufficientSampleBudget { requested: usize, available: usize },

    /// A cache entry could not be written
    #[error("Cache write failed for {}: {source}", .path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The export output directory could not be created
    #[error("Failed to create output directory {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request was cancelled before it ran
    #[error("Export cancelled")]
    Cancelled,

    /// IO error outside the cases above
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Serializable error category carried in results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    SourceNotFound,
    SourceAccessDenied,
    EngineInvocation,
    UnsupportedTrackSelection,
    InsufficientSampleBudget,
    CacheWrite,
    OutputDirectory,
    Cancelled,
    Io,
}

impl PipelineError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            PipelineError::SourceAccessDenied(_) => ErrorKind::SourceAccessDenied,
            PipelineError::EngineInvocation(_) => ErrorKind::EngineInvocation,
            PipelineError::UnsupportedTrackSelection(_) => ErrorKind::UnsupportedTrackSelection,
            PipelineError::InsufficientSampleBudget { .. } => ErrorKind::InsufficientSampleBudget,
            PipelineError::CacheWrite { .. } => ErrorKind::CacheWrite,
            PipelineError::OutputDirectory { .. } => ErrorKind::OutputDirectory,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Check that a source file exists and can be opened for reading
pub fn check_source(path: &Path) -> Result<(), PipelineError> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(PipelineError::SourceNotFound(path.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(PipelineError::SourceAccessDenied(path.to_path_buf()))
        }
        Err(e) => Err(PipelineError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_source_missing() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.mp4");

        let err = check_source(&missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);
    }

    #[test]
    fn test_check_source_present() {
        let temp_dir = TempDir::new().unwrap();
        let video = temp_dir.path().join("clip.mp4");
        std::fs::write(&video, b"data").unwrap();

        assert!(check_source(&video).is_ok());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InsufficientSampleBudget).unwrap();
        assert_eq!(json, "\"insufficient_sample_budget\"");
    }

    #[test]
    fn test_engine_error_converts() {
        let err: PipelineError = EngineError::Failed {
            code: Some(1),
            stderr: "boom".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::EngineInvocation);
        assert!(err.to_string().contains("boom"));
    }
}
