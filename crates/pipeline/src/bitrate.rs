//! Bitrate planning: turns a quality intent into concrete encoder bitrates.

use serde::{Deserialize, Serialize};

use crate::options::{ExportOptions, QualityMode};

/// Lowest video bitrate ever planned, in bits per second
pub const MIN_VIDEO_BITRATE_BPS: f64 = 500_000.0;

/// Audio bitrate assumed when the caller does not pick one
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;

/// Named quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    High,
    Medium,
    Low,
}

impl QualityPreset {
    /// Resolve a preset name. Unknown or missing names fall back to `Medium`.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_lowercase()).as_deref() {
            Some("high") => QualityPreset::High,
            Some("low") => QualityPreset::Low,
            _ => QualityPreset::Medium,
        }
    }

    /// `(video_kbps, audio_kbps)` for this preset
    pub fn bitrates(self) -> (u32, u32) {
        match self {
            QualityPreset::High => (4000, 192),
            QualityPreset::Medium => (2500, 128),
            QualityPreset::Low => (1000, 96),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityPreset::High => "high",
            QualityPreset::Medium => "medium",
            QualityPreset::Low => "low",
        }
    }
}

/// Concrete encoder bitrates for one export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitratePlan {
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

/// Plan bitrates for `options`.
///
/// The caller guarantees `end_time > start_time`; this function does not
/// re-validate the duration.
pub fn plan_bitrate(options: &ExportOptions) -> BitratePlan {
    match options.quality_mode {
        QualityMode::Preset => {
            let (video, audio) = QualityPreset::from_name(options.quality.as_deref()).bitrates();
            BitratePlan {
                video_bitrate_kbps: video,
                audio_bitrate_kbps: audio,
            }
        }
        QualityMode::TargetSize => {
            let audio_kbps = options
                .audio_bitrate_kbps
                .unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS);
            let video_kbps = target_size_video_kbps(
                options.target_size_mb.unwrap_or(0.0),
                options.duration(),
                options.has_audio().then_some(audio_kbps),
            );
            BitratePlan {
                video_bitrate_kbps: video_kbps,
                audio_bitrate_kbps: audio_kbps,
            }
        }
    }
}

/// Video bitrate (kbps) that fits `target_size_mb` over `duration_secs`,
/// after reserving room for audio. Never below [`MIN_VIDEO_BITRATE_BPS`].
pub fn target_size_video_kbps(
    target_size_mb: f64,
    duration_secs: f64,
    audio_kbps: Option<u32>,
) -> u32 {
    let target_bits = target_size_mb * 8.0 * 1024.0 * 1024.0;
    let audio_bits = audio_kbps
        .map(|kbps| kbps as f64 * 1000.0 * duration_secs)
        .unwrap_or(0.0);
    let video_bps = ((target_bits - audio_bits) / duration_secs).max(MIN_VIDEO_BITRATE_BPS);
    (video_bps / 1000.0).floor() as u32
}
