//! Audio waveform extraction.
//!
//! A track is decoded to mono 16-bit PCM by the engine, reduced to
//! `sample_count` magnitudes, smoothed, peak-normalized and cached.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache_key::waveform_stem;
use crate::cache_store::WaveformCacheStore;
use crate::engine::commands::waveform_decode;
use crate::engine::{EngineError, TranscodeEngine};
use crate::error::{check_source, PipelineError};
use crate::registry::InFlightRegistry;

/// Size of the canonical WAV header preceding sample data
pub const WAV_HEADER_LEN: usize = 44;

/// Longest warm-up skip, in seconds of audio
const WARMUP_SECONDS: f64 = 0.1;

/// Longest warm-up skip, as a fraction of all samples
const WARMUP_FRACTION: f64 = 0.02;

const RMS_WEIGHT: f32 = 1.6;
const PEAK_WEIGHT: f32 = 0.4;

/// Neighbors on each side in the smoothing window
const SMOOTHING_HALF_WINDOW: usize = 3;

/// Peak level after normalization
pub const NORMALIZED_PEAK: f32 = 0.9;

/// Below this peak the signal is treated as silence and left unscaled
const SILENCE_THRESHOLD: f32 = 1e-5;

/// Parse a mono `pcm_s16le` WAV stream into samples in `[-1, 1]`
pub fn decode_pcm_s16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .get(WAV_HEADER_LEN..)
        .unwrap_or_default()
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// Drop leading encoder warm-up samples
pub fn skip_warmup(samples: &[f32], sample_rate: u32) -> &[f32] {
    let by_time = WARMUP_SECONDS * sample_rate as f64;
    let by_fraction = WARMUP_FRACTION * samples.len() as f64;
    let skip = by_time.min(by_fraction).floor() as usize;
    &samples[skip.min(samples.len())..]
}

/// Reduce `samples` to `count` block magnitudes of `max(1.6·rms, 0.4·peak)`.
///
/// Block `i` covers `floor(i·N/count)..floor((i+1)·N/count)`, so every
/// sample lands in exactly one block.
pub fn downsample(samples: &[f32], count: usize) -> Result<Vec<f32>, PipelineError> {
    let n = samples.len();
    if count == 0 || n < count {
        return Err(PipelineError::InsufficientSampleBudget {
            requested: count,
            available: n,
        });
    }

    Ok((0..count)
        .map(|i| {
            let block = &samples[i * n / count..(i + 1) * n / count];
            let sum_sq: f32 = block.iter().map(|x| x * x).sum();
            let rms = (sum_sq / block.len() as f32).sqrt();
            let peak = block.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
            (RMS_WEIGHT * rms).max(PEAK_WEIGHT * peak)
        })
        .collect())
}

/// Centered moving average; windows shrink at the edges
pub fn smooth(values: &[f32]) -> Vec<f32> {
    let len = values.len();
    (0..len)
        .map(|i| {
            let lo = i.saturating_sub(SMOOTHING_HALF_WINDOW);
            let hi = (i + SMOOTHING_HALF_WINDOW + 1).min(len);
            let window = &values[lo..hi];
            window.iter().sum::<f32>() / window.len() as f32
        })
        .collect()
}

/// Scale so the largest magnitude becomes [`NORMALIZED_PEAK`]
pub fn normalize(values: &mut [f32]) {
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_abs > SILENCE_THRESHOLD {
        let scale = NORMALIZED_PEAK / max_abs;
        values.iter_mut().for_each(|v| *v *= scale);
    }
}

/// Full reduction from decoded samples to `count` waveform values
pub fn compute_waveform(
    samples: &[f32],
    sample_rate: u32,
    count: usize,
) -> Result<Vec<f32>, PipelineError> {
    let trimmed = skip_warmup(samples, sample_rate);
    let mut values = smooth(&downsample(trimmed, count)?);
    normalize(&mut values);
    Ok(values)
}

/// Cached waveform extraction over a [`TranscodeEngine`]
#[derive(Clone)]
pub struct WaveformExtractor {
    engine: Arc<dyn TranscodeEngine>,
    store: WaveformCacheStore,
    registry: InFlightRegistry,
    /// Fixed decode rate; `None` decodes at `sample_count` Hz
    decode_sample_rate: Option<u32>,
}

impl WaveformExtractor {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        store: WaveformCacheStore,
        registry: InFlightRegistry,
        decode_sample_rate: Option<u32>,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            decode_sample_rate,
        }
    }

    pub fn store(&self) -> &WaveformCacheStore {
        &self.store
    }

    /// Extract a waveform, or `None` if none is available.
    ///
    /// Failures are logged rather than returned.
    pub async fn extract(
        &self,
        video_path: &Path,
        sample_count: usize,
        audio_track_index: u32,
    ) -> Option<Vec<f32>> {
        match self
            .try_extract(video_path, sample_count, audio_track_index)
            .await
        {
            Ok(values) => Some(values),
            Err(e) => {
                warn!(
                    video = %video_path.display(),
                    sample_count,
                    track = audio_track_index,
                    error = %e,
                    "No waveform available"
                );
                None
            }
        }
    }

    /// Extract a waveform, returning the reason on failure
    pub async fn try_extract(
        &self,
        video_path: &Path,
        sample_count: usize,
        audio_track_index: u32,
    ) -> Result<Vec<f32>, PipelineError> {
        if sample_count == 0 {
            return Err(PipelineError::Configuration(
                "sample count must be positive".to_string(),
            ));
        }

        let stem = waveform_stem(
            video_path,
            sample_count,
            audio_track_index,
            self.decode_sample_rate,
        );
        let _guard = self.registry.acquire(&format!("waveform:{}", stem)).await;

        if let Some(values) = self.store.load(&stem, sample_count) {
            debug!(stem = %stem, "Waveform cache hit");
            return Ok(values);
        }

        check_source(video_path)?;

        let sample_rate = match self.decode_sample_rate {
            Some(rate) => rate,
            None => u32::try_from(sample_count).map_err(|_| {
                PipelineError::Configuration(format!("sample count {} too large", sample_count))
            })?,
        };

        let output = self
            .engine
            .run(
                waveform_decode(video_path, audio_track_index, sample_rate),
                None,
            )
            .await
            .map_err(|e| match e {
                EngineError::StreamNotFound(_) => {
                    PipelineError::UnsupportedTrackSelection(audio_track_index)
                }
                other => PipelineError::EngineInvocation(other),
            })?;

        let samples = decode_pcm_s16le(&output.stdout);
        let values = compute_waveform(&samples, sample_rate, sample_count)?;

        match self.store.store(&stem, &values) {
            Ok(path) => info!(path = %path.display(), "Waveform cached"),
            Err(e) => warn!(error = %e, "Waveform computed but not cached"),
        }

        Ok(values)
    }
}
