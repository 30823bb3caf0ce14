//! ffmpeg-backed [`TranscodeEngine`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EngineError, EngineInvocation, EngineOutput, OutputTarget, TranscodeEngine};
use crate::config::EngineConfig;
use crate::progress::extract_timemark;

/// Flags placed before every invocation
const GLOBAL_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y"];

/// Stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Marker ffmpeg prints when a `-map` selector finds nothing
const NO_STREAM_MARKER: &str = "matches no streams";

/// Runs invocations through an ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    hwaccel: Option<String>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            hwaccel: None,
        }
    }

    /// Engine configured from the `[engine]` config section.
    ///
    /// A hint of `none` disables hardware decoding.
    pub fn from_config(config: &EngineConfig) -> Self {
        let hwaccel = config
            .hwaccel
            .as_deref()
            .map(str::to_lowercase)
            .filter(|hint| hint != "none");
        Self {
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            hwaccel,
        }
    }

    /// Full argument list for `invocation`
    pub fn build_args(&self, invocation: &EngineInvocation) -> Vec<String> {
        let mut args: Vec<String> = GLOBAL_ARGS.iter().map(|a| a.to_string()).collect();
        if let (true, Some(hint)) = (invocation.accelerated, &self.hwaccel) {
            args.push("-hwaccel".to_string());
            args.push(hint.clone());
        }
        args.extend(invocation.to_args());
        args
    }
}

/// Read engine stderr to the end, forwarding timemarks and keeping a tail.
///
/// ffmpeg rewrites its status line with `\r`, so both `\r` and `\n` end a
/// line here.
async fn drain_stderr<R>(stderr: R, timemarks: Option<mpsc::Sender<String>>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let chunk = String::from_utf8_lossy(&buf);
        for line in chunk.split(['\r', '\n']).map(str::trim).filter(|l| !l.is_empty()) {
            if let (Some(tx), Some(mark)) = (&timemarks, extract_timemark(line)) {
                // Marks are dropped while the channel is full; stderr must keep draining
                let _ = tx.try_send(mark.to_string());
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }

    tail.into_iter().collect()
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn run(
        &self,
        invocation: EngineInvocation,
        timemarks: Option<mpsc::Sender<String>>,
    ) -> Result<EngineOutput, EngineError> {
        let args = self.build_args(&invocation);
        debug!(ffmpeg = %self.ffmpeg_path.display(), args = ?args, "Running engine");

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match invocation.output {
            OutputTarget::Pipe => cmd.stdout(Stdio::piped()),
            OutputTarget::File(_) => cmd.stdout(Stdio::null()),
        };

        let mut child = cmd.spawn().map_err(EngineError::Spawn)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Both pipes are drained while the child runs so neither can fill up
        let read_stdout = async {
            let mut bytes = Vec::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_end(&mut bytes).await?;
            }
            Ok::<_, std::io::Error>(bytes)
        };
        let read_stderr = async {
            match stderr {
                Some(stderr) => drain_stderr(stderr, timemarks).await,
                None => Vec::new(),
            }
        };

        let (stdout_bytes, stderr_tail, status) =
            tokio::join!(read_stdout, read_stderr, child.wait());
        let status = status?;
        let stdout_bytes = stdout_bytes?;

        if status.success() {
            return Ok(EngineOutput {
                stdout: stdout_bytes,
            });
        }

        if let Some(line) = stderr_tail.iter().find(|l| l.contains(NO_STREAM_MARKER)) {
            return Err(EngineError::StreamNotFound(line.clone()));
        }

        Err(EngineError::Failed {
            code: status.code(),
            stderr: stderr_tail.join("\n"),
        })
    }
}
