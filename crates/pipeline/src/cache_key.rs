//! Deterministic cache keys for export outputs and waveform results.
//!
//! Export keys hash a [`NormalizedExportOptions`] value: the subset of
//! [`ExportOptions`] that changes output bytes, with every optional field
//! spelled out so absent and null inputs canonicalize identically. The
//! digest is MD5 over the JSON serialization, truncated to
//! [`EXPORT_KEY_LEN`] hex characters. The source file name, extension
//! included, is part of the hashed value so sources sharing a stem in one
//! directory never share a clips entry.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::bitrate::{QualityPreset, DEFAULT_AUDIO_BITRATE_KBPS};
use crate::error::PipelineError;
use crate::options::{ExportOptions, QualityMode};

/// Hex characters kept from the export digest
pub const EXPORT_KEY_LEN: usize = 8;

/// A short, stable digest of normalized export options
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cache-relevant subset of [`ExportOptions`].
///
/// Field order is the serialization order and therefore part of the key
/// format. Fields that cannot affect the output under the chosen mode are
/// normalized to `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedExportOptions {
    pub source_name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub output_format: String,
    pub quality_mode: String,
    pub quality: Option<String>,
    pub target_size_mb: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub audio_bitrate_kbps: Option<u32>,
    pub audio_track_indices: Vec<u32>,
    pub cuts: Vec<[f64; 2]>,
}

impl NormalizedExportOptions {
    /// Canonicalize caller options for an export of `source`
    pub fn from_options(source: &Path, options: &ExportOptions) -> Self {
        let (quality, target_size_mb, audio_bitrate_kbps) = match options.quality_mode {
            QualityMode::Preset => (
                Some(
                    QualityPreset::from_name(options.quality.as_deref())
                        .as_str()
                        .to_string(),
                ),
                None,
                None,
            ),
            QualityMode::TargetSize => (
                None,
                options.target_size_mb,
                options.has_audio().then(|| {
                    options
                        .audio_bitrate_kbps
                        .unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS)
                }),
            ),
        };

        let mut cuts: Vec<[f64; 2]> = options.cuts.iter().map(|c| [c.start, c.end]).collect();
        cuts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));

        Self {
            source_name: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            start_time: options.start_time,
            end_time: options.end_time,
            output_format: options.format(),
            quality_mode: options.quality_mode.to_string(),
            quality,
            target_size_mb,
            width: options.width,
            height: options.height,
            fps: options.fps,
            audio_bitrate_kbps,
            audio_track_indices: options.audio_track_indices.clone(),
            cuts,
        }
    }

    fn check_finite(&self) -> Result<(), PipelineError> {
        let mut numbers = vec![self.start_time, self.end_time];
        numbers.extend(self.target_size_mb);
        numbers.extend(self.fps);
        numbers.extend(self.cuts.iter().flatten().copied());

        if numbers.iter().all(|n| n.is_finite()) {
            Ok(())
        } else {
            Err(PipelineError::Configuration(
                "export options contain a non-finite number".to_string(),
            ))
        }
    }

    /// Canonical serialization hashed into the key
    pub fn canonical_json(&self) -> Result<String, PipelineError> {
        // serde_json writes NaN and infinities as null, so reject them first
        self.check_finite()?;
        serde_json::to_string(self)
            .map_err(|e| PipelineError::Configuration(format!("cannot serialize options: {}", e)))
    }
}

/// Compute the export cache key for normalized options
pub fn compute_key(normalized: &NormalizedExportOptions) -> Result<CacheKey, PipelineError> {
    let json = normalized.canonical_json()?;
    let digest = format!("{:x}", md5::compute(json.as_bytes()));
    Ok(CacheKey(digest[..EXPORT_KEY_LEN].to_string()))
}

/// Normalize and hash caller options for `source` in one step
pub fn export_key(source: &Path, options: &ExportOptions) -> Result<CacheKey, PipelineError> {
    compute_key(&NormalizedExportOptions::from_options(source, options))
}

/// File stem of a waveform cache entry: `<md5(path)>_s<count>_t<track>`.
///
/// A decoupled decode rate is appended as `_r<rate>` so results computed at
/// different rates never share an entry.
pub fn waveform_stem(
    video_path: &Path,
    sample_count: usize,
    audio_track_index: u32,
    decode_sample_rate: Option<u32>,
) -> String {
    let path_hash = format!(
        "{:x}",
        md5::compute(video_path.to_string_lossy().as_bytes())
    );
    match decode_sample_rate {
        Some(rate) => format!(
            "{}_s{}_t{}_r{}",
            path_hash, sample_count, audio_track_index, rate
        ),
        None => format!("{}_s{}_t{}", path_hash, sample_count, audio_track_index),
    }
}
