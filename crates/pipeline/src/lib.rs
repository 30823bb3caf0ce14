//! clipdeck media pipeline
//!
//! Clip export with cut removal, segment re-assembly, bitrate targeting and
//! output caching; audio waveform extraction with disk caching; and a local
//! media server with range support. All transcoding goes through an external
//! ffmpeg process behind the [`TranscodeEngine`] trait.

pub mod batch;
pub mod bitrate;
pub mod cache_key;
pub mod cache_store;
pub mod engine;
pub mod error;
pub mod export;
pub mod media_url;
pub mod options;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod segments;
pub mod startup;
pub mod stream_server;
pub mod waveform;

pub use clipdeck_config as config;

pub use batch::run_in_batches;
pub use bitrate::{plan_bitrate, BitratePlan, QualityPreset};
pub use cache_key::{compute_key, export_key, waveform_stem, CacheKey, NormalizedExportOptions};
pub use cache_store::{ExportCacheStore, WaveformCacheStore};
pub use config::{Config, ConfigError};
pub use engine::{
    EngineError, EngineInvocation, EngineOutput, FfmpegEngine, OutputTarget, TranscodeEngine,
};
pub use error::{ErrorKind, PipelineError};
pub use export::{ExportEngine, ExportState, ExportStateChange, SaveLocationPrompt};
pub use media_url::{decode_media_url, encode_media_url};
pub use options::{ExportOptions, ExportResult, QualityMode};
pub use pipeline::{Pipeline, WaveformRequest};
pub use progress::{parse_timemark, ProgressEvent, ProgressTracker};
pub use registry::InFlightRegistry;
pub use segments::{plan_keep_segments, Cut, KeepSegment, TimeRange};
pub use startup::{run_startup_checks, StartupError};
pub use stream_server::{create_stream_router, run_stream_server, ServerError, StreamState};
pub use waveform::WaveformExtractor;

pub use tokio_util::sync::CancellationToken;
