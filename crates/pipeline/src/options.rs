//! Export request and result value types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::commands::container_profile;
use crate::error::{ErrorKind, PipelineError};
use crate::segments::{Cut, TimeRange};

/// How the caller expresses output quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum QualityMode {
    /// Named preset (`high`, `medium`, `low`)
    #[default]
    Preset,
    /// Fit the clip into `target_size_mb`
    TargetSize,
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityMode::Preset => write!(f, "preset"),
            QualityMode::TargetSize => write!(f, "targetSize"),
        }
    }
}

/// Caller-owned export options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub start_time: f64,
    pub end_time: f64,
    pub output_format: String,
    #[serde(default)]
    pub quality_mode: QualityMode,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default, rename = "targetSizeMB")]
    pub target_size_mb: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub audio_track_indices: Vec<u32>,
    #[serde(default)]
    pub cuts: Vec<Cut>,
    #[serde(default)]
    pub choose_export_location_interactively: bool,
}

impl ExportOptions {
    /// Options for a plain preset export of `[start, end]`
    pub fn new(start_time: f64, end_time: f64, output_format: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            output_format: output_format.into(),
            quality_mode: QualityMode::Preset,
            quality: None,
            target_size_mb: None,
            width: None,
            height: None,
            fps: None,
            audio_bitrate_kbps: None,
            audio_track_indices: vec![0],
            cuts: Vec::new(),
            choose_export_location_interactively: false,
        }
    }

    /// The requested clip range
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Requested clip length in seconds
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the output carries an audio stream
    pub fn has_audio(&self) -> bool {
        !self.audio_track_indices.is_empty()
    }

    /// Output format in canonical (lowercase, no dot) form
    pub fn format(&self) -> String {
        self.output_format.trim().trim_start_matches('.').to_lowercase()
    }

    /// Reject options the planners cannot handle.
    ///
    /// Runs before any engine invocation or temp file creation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.range().validate()?;

        let format = self.format();
        if container_profile(&format).is_none() {
            return Err(PipelineError::Configuration(format!(
                "unsupported output format '{}'",
                self.output_format
            )));
        }

        if self.quality_mode == QualityMode::TargetSize {
            match self.target_size_mb {
                Some(mb) if mb.is_finite() && mb > 0.0 => {}
                other => {
                    return Err(PipelineError::Configuration(format!(
                        "target size mode needs a positive targetSizeMB, got {:?}",
                        other
                    )))
                }
            }
        }

        if self.width == Some(0) || self.height == Some(0) {
            return Err(PipelineError::Configuration(
                "width and height must be positive".to_string(),
            ));
        }

        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(PipelineError::Configuration(format!(
                    "fps must be positive, got {}",
                    fps
                )));
            }
        }

        if self.audio_bitrate_kbps == Some(0) {
            return Err(PipelineError::Configuration(
                "audioBitrateKbps must be positive".to_string(),
            ));
        }

        for cut in &self.cuts {
            cut.validate()?;
        }

        Ok(())
    }
}

/// Outcome of an export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_cached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExportResult {
    /// A freshly encoded output
    pub fn exported(path: PathBuf) -> Self {
        Self {
            success: true,
            output_path: Some(path),
            already_cached: Some(false),
            error: None,
            message: None,
        }
    }

    /// An output that already existed under its cache key
    pub fn cached(path: PathBuf) -> Self {
        Self {
            success: true,
            output_path: Some(path),
            already_cached: Some(true),
            error: None,
            message: None,
        }
    }

    /// A failed request
    pub fn failed(err: &PipelineError) -> Self {
        Self {
            success: false,
            output_path: None,
            already_cached: None,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case_json() {
        let json = r#"{
            "startTime": 1.5,
            "endTime": 11.5,
            "outputFormat": "MP4",
            "qualityMode": "targetSize",
            "targetSizeMB": 8,
            "audioTrackIndices": [0, 2],
            "cuts": [{"start": 3.0, "end": 4.0}],
            "chooseExportLocationInteractively": true
        }"#;

        let options: ExportOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.quality_mode, QualityMode::TargetSize);
        assert_eq!(options.target_size_mb, Some(8.0));
        assert_eq!(options.audio_track_indices, vec![0, 2]);
        assert_eq!(options.cuts.len(), 1);
        assert!(options.choose_export_location_interactively);
        assert_eq!(options.format(), "mp4");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{"startTime": 0, "endTime": 5, "outputFormat": "webm"}"#;
        let options: ExportOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.quality_mode, QualityMode::Preset);
        assert!(options.audio_track_indices.is_empty());
        assert!(!options.has_audio());
        assert!(!options.choose_export_location_interactively);
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        let options = ExportOptions::new(10.0, 10.0, "mp4");
        let err = options.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let options = ExportOptions::new(0.0, 10.0, "xyz");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_target_size_needs_budget() {
        let mut options = ExportOptions::new(0.0, 10.0, "mp4");
        options.quality_mode = QualityMode::TargetSize;
        assert!(options.validate().is_err());
        options.target_size_mb = Some(0.0);
        assert!(options.validate().is_err());
        options.target_size_mb = Some(25.0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_cut() {
        let mut options = ExportOptions::new(0.0, 10.0, "mp4");
        options.cuts.push(TimeRange {
            start: 5.0,
            end: 2.0,
        });
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_result_json_shape() {
        let result = ExportResult::cached(PathBuf::from("/clips/a_1234abcd.mp4"));
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"alreadyCached\":true"));
        assert!(json.contains("\"outputPath\""));
        assert!(!json.contains("error"));
    }
}
