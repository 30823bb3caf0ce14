//! Engine invocation builders for exports and waveform decodes.
//!
//! Every invocation the pipeline issues is built here so the argument
//! surface stays in one place and can be asserted in tests.

use std::path::{Path, PathBuf};

use super::{EngineInvocation, OutputTarget};
use crate::bitrate::BitratePlan;
use crate::options::ExportOptions;
use crate::segments::TimeRange;

/// Quality settings for near-lossless segment intermediates
const INTERMEDIATE_VIDEO_ARGS: &[&str] = &["-c:v", "libx264", "-crf", "10", "-preset", "veryfast"];

/// Audio codec for segment intermediates
const INTERMEDIATE_AUDIO_CODEC: &str = "pcm_s16le";

/// Container used for segment intermediates
pub const INTERMEDIATE_EXTENSION: &str = "mkv";

/// Codec selection for one output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerProfile {
    pub video_codec: &'static str,
    /// `None` when the container carries no audio
    pub audio_codec: Option<&'static str>,
    /// Whether `-b:v` applies to the video codec
    pub uses_bitrate: bool,
    pub extra_args: &'static [&'static str],
}

/// Look up the codec profile for a canonical (lowercase, dotless) format
pub fn container_profile(format: &str) -> Option<ContainerProfile> {
    let h264 = |extra_args: &'static [&'static str]| ContainerProfile {
        video_codec: "libx264",
        audio_codec: Some("aac"),
        uses_bitrate: true,
        extra_args,
    };
    match format {
        "mp4" | "mov" | "m4v" => Some(h264(&["-pix_fmt", "yuv420p", "-movflags", "+faststart"])),
        "mkv" => Some(h264(&["-pix_fmt", "yuv420p"])),
        "webm" => Some(ContainerProfile {
            video_codec: "libvpx-vp9",
            audio_codec: Some("libopus"),
            uses_bitrate: true,
            extra_args: &["-pix_fmt", "yuv420p"],
        }),
        "gif" => Some(ContainerProfile {
            video_codec: "gif",
            audio_codec: None,
            uses_bitrate: false,
            extra_args: &[],
        }),
        _ => None,
    }
}

/// How selected audio tracks reach the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMapping {
    None,
    Single(u32),
    Mix(Vec<u32>),
}

impl AudioMapping {
    pub fn from_tracks(tracks: &[u32]) -> Self {
        match tracks {
            [] => AudioMapping::None,
            [track] => AudioMapping::Single(*track),
            many => AudioMapping::Mix(many.to_vec()),
        }
    }

    /// Map and encode arguments for this mapping
    fn args(&self, codec: &str, bitrate_kbps: Option<u32>) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            AudioMapping::None => {
                args.push("-an".to_string());
                return args;
            }
            AudioMapping::Single(track) => {
                args.extend(["-map".to_string(), format!("0:a:{}", track)]);
            }
            AudioMapping::Mix(tracks) => {
                let inputs: String = tracks.iter().map(|t| format!("[0:a:{}]", t)).collect();
                args.extend([
                    "-filter_complex".to_string(),
                    format!(
                        "{}amix=inputs={}:duration=longest[aout]",
                        inputs,
                        tracks.len()
                    ),
                    "-map".to_string(),
                    "[aout]".to_string(),
                ]);
            }
        }
        args.extend(["-c:a".to_string(), codec.to_string()]);
        if let Some(kbps) = bitrate_kbps {
            args.extend(["-b:a".to_string(), format!("{}k", kbps)]);
        }
        args
    }
}

fn trim_args(range: &TimeRange) -> Vec<String> {
    vec![
        "-ss".to_string(),
        format!("{:.3}", range.start),
        "-t".to_string(),
        format!("{:.3}", range.duration()),
    ]
}

fn scale_filter(width: Option<u32>, height: Option<u32>) -> Option<String> {
    match (width, height) {
        (None, None) => None,
        (w, h) => {
            let dim = |d: Option<u32>| d.map(|v| v.to_string()).unwrap_or_else(|| "-2".to_string());
            Some(format!("scale={}:{}", dim(w), dim(h)))
        }
    }
}

/// Output arguments for a final encode with the given audio mapping.
///
/// Options must already be validated; unknown formats fall back to no
/// codec arguments so the engine picks its defaults.
fn final_output_args(options: &ExportOptions, plan: &BitratePlan, audio: &AudioMapping) -> Vec<String> {
    let mut args = vec!["-map".to_string(), "0:v:0".to_string()];
    let profile = container_profile(&options.format());

    if let Some(profile) = profile {
        args.extend(["-c:v".to_string(), profile.video_codec.to_string()]);
        if profile.uses_bitrate {
            args.extend(["-b:v".to_string(), format!("{}k", plan.video_bitrate_kbps)]);
        }
        args.extend(profile.extra_args.iter().map(|a| a.to_string()));
    }

    if let Some(filter) = scale_filter(options.width, options.height) {
        args.extend(["-vf".to_string(), filter]);
    }
    if let Some(fps) = options.fps {
        args.extend(["-r".to_string(), fps.to_string()]);
    }

    match profile.and_then(|p| p.audio_codec) {
        Some(codec) => args.extend(audio.args(codec, Some(plan.audio_bitrate_kbps))),
        None => args.push("-an".to_string()),
    }
    args
}

/// One encode of the full requested range straight to the final output
pub fn single_pass(
    source: &Path,
    range: &TimeRange,
    options: &ExportOptions,
    plan: &BitratePlan,
    output: PathBuf,
) -> EngineInvocation {
    EngineInvocation {
        input: source.to_path_buf(),
        input_args: trim_args(range),
        output_args: final_output_args(
            options,
            plan,
            &AudioMapping::from_tracks(&options.audio_track_indices),
        ),
        output: OutputTarget::File(output),
        accelerated: true,
    }
}

/// Encode one keep segment into a near-lossless intermediate.
///
/// Selected audio tracks are mixed into a single stream here, so the
/// concat pass only ever sees one audio track.
pub fn segment_intermediate(
    source: &Path,
    segment: &TimeRange,
    audio_tracks: &[u32],
    output: PathBuf,
) -> EngineInvocation {
    let mut output_args = vec!["-map".to_string(), "0:v:0".to_string()];
    output_args.extend(INTERMEDIATE_VIDEO_ARGS.iter().map(|a| a.to_string()));
    output_args.extend(AudioMapping::from_tracks(audio_tracks).args(INTERMEDIATE_AUDIO_CODEC, None));

    EngineInvocation {
        input: source.to_path_buf(),
        input_args: trim_args(segment),
        output_args,
        output: OutputTarget::File(output),
        accelerated: true,
    }
}

/// Concatenate intermediates listed in `manifest` into the final output
pub fn concat_final(
    manifest: &Path,
    options: &ExportOptions,
    plan: &BitratePlan,
    output: PathBuf,
) -> EngineInvocation {
    let audio = if options.has_audio() {
        AudioMapping::Single(0)
    } else {
        AudioMapping::None
    };
    EngineInvocation {
        input: manifest.to_path_buf(),
        input_args: ["-f", "concat", "-safe", "0"]
            .iter()
            .map(|a| a.to_string())
            .collect(),
        output_args: final_output_args(options, plan, &audio),
        output: OutputTarget::File(output),
        accelerated: false,
    }
}

/// Concat demuxer list for `segments`, in order
pub fn concat_manifest(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Decode one audio track to mono 16-bit WAV on stdout.
///
/// Bit-exact flags keep the WAV header at its canonical 44 bytes.
pub fn waveform_decode(source: &Path, audio_track_index: u32, sample_rate: u32) -> EngineInvocation {
    let output_args = [
        "-map".to_string(),
        format!("0:a:{}", audio_track_index),
        "-vn".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-map_metadata".to_string(),
        "-1".to_string(),
        "-fflags".to_string(),
        "+bitexact".to_string(),
        "-flags:a".to_string(),
        "+bitexact".to_string(),
        "-f".to_string(),
        "wav".to_string(),
    ];
    EngineInvocation {
        input: source.to_path_buf(),
        input_args: Vec::new(),
        output_args: output_args.to_vec(),
        output: OutputTarget::Pipe,
        accelerated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::plan_bitrate;
    use proptest::prelude::*;

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn single(options: &ExportOptions) -> Vec<String> {
        let plan = plan_bitrate(options);
        single_pass(
            Path::new("/videos/game.mp4"),
            &options.range(),
            options,
            &plan,
            PathBuf::from("/out/clip.mp4"),
        )
        .to_args()
    }

    #[test]
    fn test_single_pass_trims_and_maps_video() {
        let mut options = ExportOptions::new(2.5, 12.5, "mp4");
        options.quality = Some("high".to_string());
        let args = single(&options);

        assert!(has_flag_with_value(&args, "-ss", "2.500"));
        assert!(has_flag_with_value(&args, "-t", "10.000"));
        assert!(has_flag_with_value(&args, "-map", "0:v:0"));
        assert!(has_flag_with_value(&args, "-c:v", "libx264"));
        assert!(has_flag_with_value(&args, "-b:v", "4000k"));
        assert!(has_flag_with_value(&args, "-b:a", "192k"));
        assert!(has_flag_with_value(&args, "-movflags", "+faststart"));
        // Trims are input options
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
    }

    #[test]
    fn test_no_audio_tracks_disables_audio() {
        let mut options = ExportOptions::new(0.0, 5.0, "mp4");
        options.audio_track_indices.clear();
        let args = single(&options);
        assert!(has_flag(&args, "-an"));
        assert!(!has_flag(&args, "-c:a"));
    }

    #[test]
    fn test_single_track_maps_directly() {
        let mut options = ExportOptions::new(0.0, 5.0, "mp4");
        options.audio_track_indices = vec![2];
        let args = single(&options);
        assert!(has_flag_with_value(&args, "-map", "0:a:2"));
        assert!(!has_flag(&args, "-filter_complex"));
    }

    #[test]
    fn test_multiple_tracks_are_mixed() {
        let mut options = ExportOptions::new(0.0, 5.0, "mp4");
        options.audio_track_indices = vec![0, 1, 3];
        let args = single(&options);
        assert!(has_flag_with_value(
            &args,
            "-filter_complex",
            "[0:a:0][0:a:1][0:a:3]amix=inputs=3:duration=longest[aout]"
        ));
        assert!(has_flag_with_value(&args, "-map", "[aout]"));
        assert!(has_flag_with_value(&args, "-map", "0:v:0"));
    }

    #[test]
    fn test_scale_and_fps() {
        let mut options = ExportOptions::new(0.0, 5.0, "webm");
        options.width = Some(1280);
        options.fps = Some(30.0);
        let args = single(&options);
        assert!(has_flag_with_value(&args, "-vf", "scale=1280:-2"));
        assert!(has_flag_with_value(&args, "-r", "30"));
        assert!(has_flag_with_value(&args, "-c:v", "libvpx-vp9"));
        assert!(has_flag_with_value(&args, "-c:a", "libopus"));
    }

    #[test]
    fn test_gif_has_no_audio_or_bitrate() {
        let mut options = ExportOptions::new(0.0, 3.0, "gif");
        options.audio_track_indices = vec![0, 1];
        let args = single(&options);
        assert!(has_flag_with_value(&args, "-c:v", "gif"));
        assert!(has_flag(&args, "-an"));
        assert!(!has_flag(&args, "-b:v"));
        assert!(!has_flag(&args, "-filter_complex"));
    }

    #[test]
    fn test_unknown_format_has_no_profile() {
        assert!(container_profile("xyz").is_none());
        assert!(container_profile("mkv").is_some());
    }

    #[test]
    fn test_segment_intermediate_is_near_lossless() {
        let segment = TimeRange {
            start: 20.0,
            end: 30.0,
        };
        let args = segment_intermediate(
            Path::new("/videos/game.mp4"),
            &segment,
            &[0, 1],
            PathBuf::from("/tmp/seg_0.mkv"),
        )
        .to_args();

        assert!(has_flag_with_value(&args, "-crf", "10"));
        assert!(has_flag_with_value(&args, "-preset", "veryfast"));
        assert!(has_flag_with_value(&args, "-c:a", "pcm_s16le"));
        assert!(has_flag(&args, "-filter_complex"));
        assert!(!has_flag(&args, "-b:a"));
    }

    #[test]
    fn test_concat_final_uses_demuxer() {
        let options = ExportOptions::new(0.0, 100.0, "mp4");
        let plan = plan_bitrate(&options);
        let args = concat_final(
            Path::new("/tmp/list.txt"),
            &options,
            &plan,
            PathBuf::from("/out/a.mp4"),
        )
        .to_args();

        assert!(has_flag_with_value(&args, "-f", "concat"));
        assert!(has_flag_with_value(&args, "-safe", "0"));
        assert!(has_flag_with_value(&args, "-map", "0:a:0"));
        assert!(!has_flag(&args, "-ss"));
    }

    #[test]
    fn test_manifest_escapes_quotes() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/seg_0.mkv"),
            PathBuf::from("/tmp/it's/seg_1.mkv"),
        ]);
        assert_eq!(
            manifest,
            "file '/tmp/seg_0.mkv'\nfile '/tmp/it'\\''s/seg_1.mkv'\n"
        );
    }

    #[test]
    fn test_waveform_decode_args() {
        let invocation = waveform_decode(Path::new("/videos/a.mp4"), 1, 1000);
        let args = invocation.to_args();
        assert!(has_flag_with_value(&args, "-map", "0:a:1"));
        assert!(has_flag_with_value(&args, "-ar", "1000"));
        assert!(has_flag_with_value(&args, "-ac", "1"));
        assert!(has_flag_with_value(&args, "-acodec", "pcm_s16le"));
        assert!(has_flag_with_value(&args, "-f", "wav"));
        assert!(has_flag(&args, "-vn"));
        assert_eq!(invocation.output, OutputTarget::Pipe);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_video_always_mapped(
            tracks in proptest::collection::vec(0u32..8, 0..5),
            format in prop::sample::select(vec!["mp4", "mov", "mkv", "webm", "gif"]),
        ) {
            let mut options = ExportOptions::new(1.0, 9.0, format);
            options.audio_track_indices = tracks;
            let args = single(&options);
            prop_assert!(has_flag_with_value(&args, "-map", "0:v:0"));
        }
    }
}
