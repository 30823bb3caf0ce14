//! Clip export orchestration.
//!
//! An export resolves its output path (cache key or interactive prompt),
//! plans keep segments and bitrates, then either encodes the range in one
//! pass or encodes each keep segment to a scratch intermediate and
//! concatenates them. The final pass always writes a partial file that is
//! renamed onto the output path only after the engine succeeds.

use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bitrate::{plan_bitrate, BitratePlan};
use crate::cache_key::{export_key, CacheKey};
use crate::cache_store::ExportCacheStore;
use crate::engine::commands::{
    concat_final, concat_manifest, segment_intermediate, single_pass, INTERMEDIATE_EXTENSION,
};
use crate::engine::{EngineInvocation, TranscodeEngine};
use crate::error::{check_source, PipelineError};
use crate::options::{ExportOptions, ExportResult};
use crate::progress::{forward_progress, ProgressEvent, ProgressTracker};
use crate::registry::InFlightRegistry;
use crate::segments::{plan_keep_segments, KeepSegment};

/// Name of the concat demuxer list inside the scratch directory
const MANIFEST_NAME: &str = "concat.txt";

/// Buffered timemarks between the engine and the progress forwarder
const TIMEMARK_BUFFER: usize = 32;

/// Export lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Planning,
    CacheHit,
    Encoding,
    EncodingSegments,
    Concatenating,
    CleaningUp,
    Done,
    Failed,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportState::Planning => "planning",
            ExportState::CacheHit => "cache_hit",
            ExportState::Encoding => "encoding",
            ExportState::EncodingSegments => "encoding_segments",
            ExportState::Concatenating => "concatenating",
            ExportState::CleaningUp => "cleaning_up",
            ExportState::Done => "done",
            ExportState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Done | ExportState::Failed)
    }
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition of one export request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStateChange {
    pub source: PathBuf,
    pub state: ExportState,
}

/// Chooses an output location when the caller asks to pick one.
///
/// Returning `None` cancels the export before anything runs.
#[async_trait]
pub trait SaveLocationPrompt: Send + Sync {
    async fn choose(&self, source: &Path, suggested_name: &str) -> Option<PathBuf>;
}

/// Scratch directory removed when dropped, on every exit path
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> io::Result<Self> {
        let path = root.join(format!("clipdeck_export_{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory"),
        }
    }
}

/// Partial file written by the final pass, removed unless persisted
struct PartialOutput {
    path: PathBuf,
    persisted: bool,
}

impl PartialOutput {
    fn next_to(final_path: &Path, format: &str) -> Self {
        let stem = final_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            path: parent.join(format!("{}.partial-{}.{}", stem, Uuid::new_v4(), format)),
            persisted: false,
        }
    }

    fn persist(mut self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Logs transitions and forwards them to the optional observer
struct StateReporter<'a> {
    source: &'a Path,
    observer: Option<&'a mpsc::UnboundedSender<ExportStateChange>>,
    current: ExportState,
}

impl<'a> StateReporter<'a> {
    fn new(source: &'a Path, observer: Option<&'a mpsc::UnboundedSender<ExportStateChange>>) -> Self {
        let reporter = Self {
            source,
            observer,
            current: ExportState::Planning,
        };
        reporter.emit();
        reporter
    }

    fn enter(&mut self, state: ExportState) {
        if self.current.is_terminal() {
            return;
        }
        info!(source = %self.source.display(), from = %self.current, to = %state, "Export state change");
        self.current = state;
        self.emit();
    }

    fn emit(&self) {
        if let Some(tx) = self.observer {
            let _ = tx.send(ExportStateChange {
                source: self.source.to_path_buf(),
                state: self.current,
            });
        }
    }
}

/// Where a request's output goes
struct OutputPlan {
    path: PathBuf,
    lock_key: String,
    /// Set when an existing file at `path` is a cache hit
    cache_key: Option<CacheKey>,
}

/// Runs export requests through a [`TranscodeEngine`]
#[derive(Clone)]
pub struct ExportEngine {
    engine: Arc<dyn TranscodeEngine>,
    store: ExportCacheStore,
    registry: InFlightRegistry,
    scratch_root: PathBuf,
    save_prompt: Option<Arc<dyn SaveLocationPrompt>>,
    observer: Option<mpsc::UnboundedSender<ExportStateChange>>,
}

impl ExportEngine {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        store: ExportCacheStore,
        registry: InFlightRegistry,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            scratch_root: scratch_root.into(),
            save_prompt: None,
            observer: None,
        }
    }

    pub fn with_save_prompt(mut self, prompt: Arc<dyn SaveLocationPrompt>) -> Self {
        self.save_prompt = Some(prompt);
        self
    }

    /// Send every state transition to `observer`
    pub fn with_state_observer(mut self, observer: mpsc::UnboundedSender<ExportStateChange>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &ExportCacheStore {
        &self.store
    }

    /// Export `source` per `options`, reporting final-pass progress on
    /// `progress`. Never fails; errors are carried in the result.
    pub async fn export(
        &self,
        source: &Path,
        options: &ExportOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> ExportResult {
        let mut states = StateReporter::new(source, self.observer.as_ref());
        match self.run(source, options, progress, cancel, &mut states).await {
            Ok(result) => {
                states.enter(ExportState::Done);
                result
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Export failed");
                states.enter(ExportState::Failed);
                ExportResult::failed(&e)
            }
        }
    }

    async fn run(
        &self,
        source: &Path,
        options: &ExportOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
        states: &mut StateReporter<'_>,
    ) -> Result<ExportResult, PipelineError> {
        options.validate()?;
        check_source(source)?;

        let output = self.resolve_output(source, options).await?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let _guard = self.registry.acquire(&output.lock_key).await;

        if let Some(key) = &output.cache_key {
            if let Some(path) = self.store.lookup(source, key, &options.format()) {
                info!(path = %path.display(), "Export cache hit");
                states.enter(ExportState::CacheHit);
                return Ok(ExportResult::cached(path));
            }
        }

        let segments = plan_keep_segments(options.range(), &options.cuts);
        if segments.is_empty() {
            return Err(PipelineError::Configuration(
                "cuts remove the entire clip".to_string(),
            ));
        }
        let plan = plan_bitrate(options);
        debug!(?plan, segments = segments.len(), "Export planned");

        if let Some(dir) = output.path.parent() {
            fs::create_dir_all(dir).map_err(|source| PipelineError::OutputDirectory {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let partial = PartialOutput::next_to(&output.path, &options.format());

        if let [segment] = segments.as_slice() {
            states.enter(ExportState::Encoding);
            let invocation = single_pass(source, segment, options, &plan, partial.path.clone());
            self.run_final(invocation, segment.duration(), progress).await?;
        } else {
            states.enter(ExportState::EncodingSegments);
            let scratch = ScratchDir::create(&self.scratch_root)?;
            self.encode_segments(source, options, &plan, &segments, &scratch, &partial, progress, cancel, states)
                .await?;
            states.enter(ExportState::CleaningUp);
            drop(scratch);
        }

        partial.persist(&output.path)?;
        info!(path = %output.path.display(), "Export written");
        Ok(ExportResult::exported(output.path))
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_segments(
        &self,
        source: &Path,
        options: &ExportOptions,
        plan: &BitratePlan,
        segments: &[KeepSegment],
        scratch: &ScratchDir,
        partial: &PartialOutput,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
        states: &mut StateReporter<'_>,
    ) -> Result<(), PipelineError> {
        let mut intermediates = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let path = scratch
                .path
                .join(format!("segment_{:03}.{}", index, INTERMEDIATE_EXTENSION));
            debug!(index, start = segment.start, end = segment.end, "Encoding segment");
            self.engine
                .run(
                    segment_intermediate(source, segment, &options.audio_track_indices, path.clone()),
                    None,
                )
                .await?;
            intermediates.push(path);
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let manifest = scratch.path.join(MANIFEST_NAME);
        fs::write(&manifest, concat_manifest(&intermediates))?;

        states.enter(ExportState::Concatenating);
        let total: f64 = segments.iter().map(KeepSegment::duration).sum();
        self.run_final(
            concat_final(&manifest, options, plan, partial.path.clone()),
            total,
            progress,
        )
        .await
    }

    /// Run the pass that writes the final output, forwarding its progress
    async fn run_final(
        &self,
        invocation: EngineInvocation,
        total_duration: f64,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<(), PipelineError> {
        let Some(events) = progress else {
            self.engine.run(invocation, None).await?;
            return Ok(());
        };

        let (mark_tx, mark_rx) = mpsc::channel(TIMEMARK_BUFFER);
        let (result, mut tracker) = tokio::join!(
            self.engine.run(invocation, Some(mark_tx)),
            forward_progress(mark_rx, ProgressTracker::new(total_duration), events.clone())
        );
        result?;
        let _ = events.try_send(tracker.finish());
        Ok(())
    }

    async fn resolve_output(
        &self,
        source: &Path,
        options: &ExportOptions,
    ) -> Result<OutputPlan, PipelineError> {
        let format = options.format();
        let key = export_key(source, options)?;

        if !options.choose_export_location_interactively {
            let path = self.store.output_path(source, &key, &format);
            return Ok(OutputPlan {
                lock_key: format!("export:{}", path.display()),
                path,
                cache_key: Some(key),
            });
        }

        let prompt = self.save_prompt.as_ref().ok_or_else(|| {
            PipelineError::Configuration("no save location prompt configured".to_string())
        })?;
        let suggested = self
            .store
            .output_path(source, &key, &format)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match prompt.choose(source, &suggested).await {
            Some(path) => Ok(OutputPlan {
                lock_key: format!("export:{}", path.display()),
                path,
                cache_key: None,
            }),
            None => {
                info!(source = %source.display(), "Save location prompt dismissed");
                Err(PipelineError::Cancelled)
            }
        }
    }
}
