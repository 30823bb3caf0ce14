//! On-disk caches for waveform results and exported clips.
//!
//! Both caches are plain directories; file names carry the keys, so a
//! directory listing is the index.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache_key::CacheKey;
use crate::error::PipelineError;

/// Extension of waveform cache entries
pub const WAVEFORM_EXTENSION: &str = "waveform";

/// Flat directory of `<stem>.waveform` files holding raw f32 LE samples
#[derive(Debug, Clone)]
pub struct WaveformCacheStore {
    dir: PathBuf,
}

impl WaveformCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, WAVEFORM_EXTENSION))
    }

    /// Load an entry of exactly `sample_count` values.
    ///
    /// Missing, unreadable and wrong-length files are all misses.
    pub fn load(&self, stem: &str, sample_count: usize) -> Option<Vec<f32>> {
        let path = self.entry_path(stem);
        let bytes = fs::read(&path).ok()?;
        if bytes.len() != sample_count * 4 {
            debug!(path = %path.display(), len = bytes.len(), "Ignoring waveform entry of wrong length");
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Persist `samples` under `stem`.
    ///
    /// Written to a temporary name first and renamed, so readers never see
    /// a partial entry.
    pub fn store(&self, stem: &str, samples: &[f32]) -> Result<PathBuf, PipelineError> {
        let path = self.entry_path(stem);
        let tmp = self.dir.join(format!(".{}.{}.tmp", stem, Uuid::new_v4()));
        let cache_err = |source: io::Error| PipelineError::CacheWrite {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(cache_err)?;

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        if let Err(e) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(cache_err(e));
        }
        Ok(path)
    }

    /// Remove every waveform entry; returns how many were removed
    pub fn purge(&self) -> Result<usize, PipelineError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(WAVEFORM_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove waveform entry"),
            }
        }
        Ok(removed)
    }
}

/// Exported clips stored next to their source as
/// `<sourceDir>/<sourceName>_clips/<sourceName>_<key>.<format>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportCacheStore;

impl ExportCacheStore {
    pub fn new() -> Self {
        Self
    }

    fn source_name(source: &Path) -> String {
        source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string())
    }

    /// Directory holding every export of `source`
    pub fn clips_dir(&self, source: &Path) -> PathBuf {
        let parent = source.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!("{}_clips", Self::source_name(source)))
    }

    /// Canonical output path for `key`
    pub fn output_path(&self, source: &Path, key: &CacheKey, format: &str) -> PathBuf {
        self.clips_dir(source)
            .join(format!("{}_{}.{}", Self::source_name(source), key, format))
    }

    /// The canonical path, if an export already lives there
    pub fn lookup(&self, source: &Path, key: &CacheKey, format: &str) -> Option<PathBuf> {
        let path = self.output_path(source, key, format);
        path.is_file().then_some(path)
    }

    /// Remove every cached export of `source`; returns whether anything was removed
    pub fn purge_for(&self, source: &Path) -> Result<bool, PipelineError> {
        match fs::remove_dir_all(self.clips_dir(source)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key::export_key;
    use crate::options::ExportOptions;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_waveform_round_trip_is_byte_identical() {
        let temp_dir = TempDir::new().unwrap();
        let store = WaveformCacheStore::new(temp_dir.path().join("waveforms"));
        let samples = vec![0.0, 0.25, -0.5, 0.9, f32::MIN_POSITIVE];

        let path = store.store("abc_s5_t0", &samples).unwrap();
        let first = fs::read(&path).unwrap();

        let loaded = store.load("abc_s5_t0", samples.len()).unwrap();
        assert_eq!(loaded, samples);

        store.store("abc_s5_t0", &loaded).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_wrong_length_is_miss() {
        let temp_dir = TempDir::new().unwrap();
        let store = WaveformCacheStore::new(temp_dir.path());
        store.store("k", &[0.1, 0.2, 0.3]).unwrap();

        assert!(store.load("k", 4).is_none());
        assert!(store.load("missing", 3).is_none());
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = WaveformCacheStore::new(temp_dir.path());
        store.store("k", &[0.5; 16]).unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k.waveform".to_string()]);
    }

    #[test]
    fn test_store_into_unwritable_dir_is_cache_write_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        // A regular file where the directory should be
        let store = WaveformCacheStore::new(blocker.join("waveforms"));

        let err = store.store("k", &[0.0]).unwrap_err();
        assert!(matches!(err, PipelineError::CacheWrite { .. }));
    }

    #[test]
    fn test_purge_removes_only_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = WaveformCacheStore::new(temp_dir.path());
        store.store("a", &[0.0]).unwrap();
        store.store("b", &[0.0]).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(store.purge().unwrap(), 2);
        assert!(temp_dir.path().join("notes.txt").exists());
        assert_eq!(store.purge().unwrap(), 0);
    }

    #[test]
    fn test_purge_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = WaveformCacheStore::new(temp_dir.path().join("never-created"));
        assert_eq!(store.purge().unwrap(), 0);
    }

    #[test]
    fn test_export_output_layout() {
        let store = ExportCacheStore::new();
        let source = Path::new("/videos/match.mkv");
        let key = export_key(source, &ExportOptions::new(0.0, 10.0, "mp4")).unwrap();
        let path = store.output_path(source, &key, "mp4");

        assert_eq!(
            path,
            PathBuf::from(format!("/videos/match_clips/match_{}.mp4", key))
        );
    }

    #[test]
    fn test_export_lookup_and_purge() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("game.mp4");
        fs::write(&source, b"video").unwrap();

        let store = ExportCacheStore::new();
        let key = export_key(&source, &ExportOptions::new(0.0, 10.0, "mp4")).unwrap();
        assert!(store.lookup(&source, &key, "mp4").is_none());

        let path = store.output_path(&source, &key, "mp4");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"clip").unwrap();
        assert_eq!(store.lookup(&source, &key, "mp4"), Some(path));

        assert!(store.purge_for(&source).unwrap());
        assert!(!store.clips_dir(&source).exists());
        assert!(source.exists());
        assert!(!store.purge_for(&source).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_waveform_entries_reload(samples in proptest::collection::vec(-1.0f32..1.0, 1..256)) {
            let temp_dir = TempDir::new().unwrap();
            let store = WaveformCacheStore::new(temp_dir.path());
            store.store("p", &samples).unwrap();
            prop_assert_eq!(store.load("p", samples.len()), Some(samples));
        }
    }
}
