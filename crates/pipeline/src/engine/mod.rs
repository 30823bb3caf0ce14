//! Transcoding engine seam.
//!
//! The pipeline never spawns processes directly. It describes each engine
//! run as an [`EngineInvocation`] and hands it to a [`TranscodeEngine`];
//! [`ffmpeg::FfmpegEngine`] is the production implementation.

pub mod commands;
pub mod ffmpeg;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

pub use ffmpeg::FfmpegEngine;

/// Where an invocation writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    /// Captured from stdout and returned in [`EngineOutput::stdout`]
    Pipe,
}

/// One engine run: `input_args -i input output_args output`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub input: PathBuf,
    /// Options placed before `-i` (seek, duration, demuxer)
    pub input_args: Vec<String>,
    /// Options placed after `-i` (maps, codecs, filters)
    pub output_args: Vec<String>,
    pub output: OutputTarget,
    /// Whether a hardware decode hint applies to this run
    pub accelerated: bool,
}

impl EngineInvocation {
    /// Engine arguments without global flags or hardware hints
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.input_args.clone();
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.output_args.iter().cloned());
        match &self.output {
            OutputTarget::File(path) => args.push(path.to_string_lossy().into_owned()),
            OutputTarget::Pipe => args.push("pipe:1".to_string()),
        }
        args
    }
}

/// What a successful run produced
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Bytes written to stdout; empty for file outputs
    pub stdout: Vec<u8>,
}

/// Error type for engine runs
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started
    #[error("Failed to start engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine exited unsuccessfully
    #[error("Engine exited with code {}: {stderr}", exit_code_label(.code))]
    Failed { code: Option<i32>, stderr: String },

    /// A stream selector matched nothing in the input
    #[error("Stream selector matched no streams: {0}")]
    StreamNotFound(String),

    /// IO error while talking to the engine
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// A process-based transcoder.
///
/// `timemarks`, when present, receives every raw `time=` token the engine
/// reports while it runs. The sender is dropped when the run ends.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn run(
        &self,
        invocation: EngineInvocation,
        timemarks: Option<mpsc::Sender<String>>,
    ) -> Result<EngineOutput, EngineError>;
}
