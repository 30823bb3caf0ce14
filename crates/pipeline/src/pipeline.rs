//! Host object wiring the engine, caches and request handlers together.

use axum::Router;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::run_in_batches;
use crate::cache_store::{ExportCacheStore, WaveformCacheStore};
use crate::config::Config;
use crate::engine::{FfmpegEngine, TranscodeEngine};
use crate::error::PipelineError;
use crate::export::{ExportEngine, ExportStateChange, SaveLocationPrompt};
use crate::media_url::resolve_source;
use crate::options::{ExportOptions, ExportResult};
use crate::progress::ProgressEvent;
use crate::registry::InFlightRegistry;
use crate::stream_server::{create_stream_router, run_stream_server, ServerError, StreamState};
use crate::waveform::WaveformExtractor;

/// One entry of a batched waveform request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformRequest {
    /// Filesystem path or `clipdeck-media://` URL
    pub source: String,
    pub sample_count: usize,
    #[serde(default)]
    pub audio_track_index: u32,
}

/// The media pipeline
pub struct Pipeline {
    config: Config,
    exporter: ExportEngine,
    waveforms: WaveformExtractor,
}

impl Pipeline {
    /// Pipeline over the configured ffmpeg binary
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(FfmpegEngine::from_config(&config.engine));
        Self::with_engine(config, engine)
    }

    /// Pipeline over any engine implementation
    pub fn with_engine(config: Config, engine: Arc<dyn TranscodeEngine>) -> Self {
        let registry = InFlightRegistry::new();
        let exporter = ExportEngine::new(
            Arc::clone(&engine),
            ExportCacheStore::new(),
            registry.clone(),
            config.cache.scratch_dir(),
        );
        let waveforms = WaveformExtractor::new(
            engine,
            WaveformCacheStore::new(config.cache.waveform_dir()),
            registry,
            config.waveform.decode_sample_rate,
        );
        Self {
            config,
            exporter,
            waveforms,
        }
    }

    pub fn with_save_prompt(mut self, prompt: Arc<dyn SaveLocationPrompt>) -> Self {
        self.exporter = self.exporter.with_save_prompt(prompt);
        self
    }

    pub fn with_state_observer(mut self, observer: mpsc::UnboundedSender<ExportStateChange>) -> Self {
        self.exporter = self.exporter.with_state_observer(observer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Export a clip of `source`
    pub async fn export(
        &self,
        source: &Path,
        options: &ExportOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> ExportResult {
        self.export_with_cancel(source, options, progress, &CancellationToken::new())
            .await
    }

    /// Export a clip of `source`; a cancelled token stops the request
    /// before it starts or between segment encodes
    pub async fn export_with_cancel(
        &self,
        source: &Path,
        options: &ExportOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> ExportResult {
        self.exporter.export(source, options, progress, cancel).await
    }

    /// Waveform for a path or media URL, `None` when unavailable
    pub async fn waveform(
        &self,
        source_or_url: &str,
        sample_count: usize,
        audio_track_index: u32,
    ) -> Option<Vec<f32>> {
        let path = match resolve_source(source_or_url) {
            Ok(path) => path,
            Err(e) => {
                warn!(source = source_or_url, error = %e, "Cannot resolve waveform source");
                return None;
            }
        };
        self.waveforms
            .extract(&path, sample_count, audio_track_index)
            .await
    }

    /// Extract many waveforms, `batch_size` at a time, in request order
    pub async fn extract_waveforms(&self, requests: Vec<WaveformRequest>) -> Vec<Option<Vec<f32>>> {
        run_in_batches(requests, self.config.concurrency.batch_size, |request| async move {
            self.waveform(&request.source, request.sample_count, request.audio_track_index)
                .await
        })
        .await
    }

    /// Remove every cached waveform
    pub fn purge_waveform_cache(&self) -> Result<usize, PipelineError> {
        let removed = self.waveforms.store().purge()?;
        info!(removed, "Waveform cache purged");
        Ok(removed)
    }

    /// Remove every cached export of `source`
    pub fn purge_exports_for(&self, source: &Path) -> Result<bool, PipelineError> {
        self.exporter.store().purge_for(source)
    }

    /// Router serving local media under `/media/`
    pub fn stream_router(&self) -> Router {
        create_stream_router(StreamState::new(self.config.server.workers as usize))
    }

    /// Serve media on the configured address until the server fails
    pub async fn serve(&self) -> Result<(), ServerError> {
        run_stream_server(&self.config.server).await
    }
}
