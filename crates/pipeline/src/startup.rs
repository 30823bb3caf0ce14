//! Startup checks for the media pipeline
//!
//! Verifies before any request runs that:
//! - the configured ffmpeg binary starts and reports a usable version
//! - the cache and scratch directories can be created

use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::info;

use crate::config::Config;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("Cannot create directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse FFmpeg version output and extract the major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
///
/// Git snapshot builds ("ffmpeg version N-112345-g...") carry no release
/// number and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains("ffmpeg version"))?;

    let version_part = version_line
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    version_part
        .trim_start_matches('n')
        .split(['.', '-'])
        .next()?
        .parse()
        .ok()
}

/// Check a parsed major version against the configured minimum
pub fn check_version_requirement(major: u32, min_major: u32) -> Result<(), StartupError> {
    if major < min_major {
        return Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            min_major, major
        )));
    }
    Ok(())
}

/// Run `<ffmpeg> -version` and enforce the minimum major version
///
/// # Returns
/// The detected major version
pub fn check_ffmpeg_available(ffmpeg_path: &str, min_major: u32) -> Result<u32, StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg_path, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path, output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    check_version_requirement(major, min_major)?;
    Ok(major)
}

/// Create the waveform cache and scratch directories
pub fn ensure_directories(cfg: &Config) -> Result<(), StartupError> {
    for path in [cfg.cache.waveform_dir(), cfg.cache.scratch_dir()] {
        std::fs::create_dir_all(&path).map_err(|source| StartupError::Directory {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. FFmpeg availability and version
/// 2. Cache directories
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let major = check_ffmpeg_available(&cfg.engine.ffmpeg_path, cfg.engine.min_ffmpeg_major)?;
    info!(ffmpeg_major = major, "FFmpeg available");
    ensure_directories(cfg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_real_outputs() {
        assert_eq!(
            parse_ffmpeg_version("ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023"),
            Some(6)
        );
        assert_eq!(
            parse_ffmpeg_version("ffmpeg version n7.0.2-18-g3e6cec1286 Copyright"),
            Some(7)
        );
        assert_eq!(
            parse_ffmpeg_version("ffmpeg version N-112345-g1a2b3c4d Copyright"),
            None
        );
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_version_requirement() {
        assert!(check_version_requirement(4, 4).is_ok());
        assert!(check_version_requirement(7, 4).is_ok());
        assert!(matches!(
            check_version_requirement(3, 4),
            Err(StartupError::FfmpegVersion(_))
        ));
    }

    #[test]
    fn test_missing_ffmpeg_binary() {
        let result = check_ffmpeg_available("nonexistent_ffmpeg_xyz_12345", 4);
        assert!(matches!(result, Err(StartupError::FfmpegUnavailable(_))));
    }

    #[test]
    fn test_ensure_directories_creates_both() {
        let temp_dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.cache.waveform_dir = Some(temp_dir.path().join("a").join("waveforms"));
        cfg.cache.scratch_dir = Some(temp_dir.path().join("scratch"));

        ensure_directories(&cfg).unwrap();
        assert!(temp_dir.path().join("a").join("waveforms").is_dir());
        assert!(temp_dir.path().join("scratch").is_dir());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024\nbuilt with gcc 12.2.0",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_versions_below_minimum_rejected(
            min_major in 2u32..10,
            delta in 1u32..2,
        ) {
            prop_assert!(check_version_requirement(min_major - delta, min_major).is_err());
            prop_assert!(check_version_requirement(min_major + delta, min_major).is_ok());
        }
    }
}
