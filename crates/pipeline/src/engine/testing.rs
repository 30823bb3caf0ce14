//! Recording engine double for pipeline tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{EngineError, EngineInvocation, EngineOutput, OutputTarget, TranscodeEngine};

/// Build a WAV byte stream: 44-byte header followed by `samples` as i16 LE
pub(crate) fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1000u32.to_le_bytes());
    bytes.extend_from_slice(&2000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Records every invocation; writes placeholder files for file outputs and
/// returns canned WAV bytes for piped ones.
#[derive(Default)]
pub(crate) struct RecordingEngine {
    calls: Mutex<Vec<EngineInvocation>>,
    count: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_on_call: Option<usize>,
    missing_stream: bool,
    wav: Vec<u8>,
    timemarks: Vec<String>,
    delay: Option<Duration>,
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_samples(mut self, samples: &[i16]) -> Self {
        self.wav = wav_bytes(samples);
        self
    }

    /// Fail the `n`th call (1-based)
    pub(crate) fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Fail every call as if the requested stream did not exist
    pub(crate) fn missing_stream(mut self) -> Self {
        self.missing_stream = true;
        self
    }

    pub(crate) fn with_timemarks(mut self, marks: &[&str]) -> Self {
        self.timemarks = marks.iter().map(|m| m.to_string()).collect();
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at once
    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<EngineInvocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TranscodeEngine for RecordingEngine {
    async fn run(
        &self,
        invocation: EngineInvocation,
        timemarks: Option<mpsc::Sender<String>>,
    ) -> Result<EngineOutput, EngineError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.missing_stream {
            return Err(EngineError::StreamNotFound(
                "Stream map '0:a:9' matches no streams.".to_string(),
            ));
        }
        if self.fail_on_call == Some(n) {
            return Err(EngineError::Failed {
                code: Some(1),
                stderr: format!("call {} failed", n),
            });
        }

        if let Some(tx) = timemarks {
            for mark in &self.timemarks {
                let _ = tx.send(mark.clone()).await;
            }
        }

        match invocation.output {
            OutputTarget::File(path) => {
                std::fs::write(&path, b"encoded")?;
                Ok(EngineOutput::default())
            }
            OutputTarget::Pipe => Ok(EngineOutput {
                stdout: self.wav.clone(),
            }),
        }
    }
}
