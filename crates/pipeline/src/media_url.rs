//! `clipdeck-media://` URLs that embed a local file path.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::PathBuf;

use crate::error::PipelineError;

pub const MEDIA_SCHEME: &str = "clipdeck-media";

/// Bytes left as-is when encoding; `/` is escaped so the path stays one segment
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the addressable URL for `path`
pub fn encode_media_url(path: &std::path::Path) -> String {
    let raw = path.to_string_lossy();
    format!("{}://{}", MEDIA_SCHEME, utf8_percent_encode(&raw, PATH_SAFE))
}

/// Decode a percent-encoded path component
pub fn decode_path_component(encoded: &str) -> Result<PathBuf, PipelineError> {
    let decoded = percent_decode_str(encoded).decode_utf8().map_err(|e| {
        PipelineError::Configuration(format!("media path is not valid UTF-8: {}", e))
    })?;
    if decoded.is_empty() {
        return Err(PipelineError::Configuration("empty media path".to_string()));
    }
    Ok(PathBuf::from(decoded.as_ref()))
}

/// Decode a `clipdeck-media://` URL to a filesystem path.
///
/// Query strings and fragments are ignored.
pub fn decode_media_url(url: &str) -> Result<PathBuf, PipelineError> {
    let rest = url
        .strip_prefix(MEDIA_SCHEME)
        .and_then(|r| r.strip_prefix("://"))
        .ok_or_else(|| {
            PipelineError::Configuration(format!("not a {} URL: {}", MEDIA_SCHEME, url))
        })?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    decode_path_component(rest)
}

/// Resolve either a media URL or a plain path
pub fn resolve_source(source_or_url: &str) -> Result<PathBuf, PipelineError> {
    if source_or_url.starts_with(MEDIA_SCHEME) {
        decode_media_url(source_or_url)
    } else {
        Ok(PathBuf::from(source_or_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;

    #[test]
    fn test_decode_encoded_path() {
        let path = decode_media_url("clipdeck-media://%2Fvideos%2FMy%20Clip%20%231.mp4").unwrap();
        assert_eq!(path, PathBuf::from("/videos/My Clip #1.mp4"));
    }

    #[test]
    fn test_decode_ignores_query() {
        let path = decode_media_url("clipdeck-media://%2Fa%2Fb.mp4?t=10").unwrap();
        assert_eq!(path, PathBuf::from("/a/b.mp4"));
    }

    #[test]
    fn test_decode_unencoded_slashes() {
        let path = decode_media_url("clipdeck-media:///home/me/clip.mkv").unwrap();
        assert_eq!(path, PathBuf::from("/home/me/clip.mkv"));
    }

    #[test]
    fn test_rejects_other_schemes_and_empty() {
        assert!(decode_media_url("file:///a.mp4").is_err());
        assert!(decode_media_url("clipdeck-media://").is_err());
        assert!(decode_media_url("clipdeck-media://%FF").is_err());
    }

    #[test]
    fn test_resolve_plain_path() {
        assert_eq!(
            resolve_source("/videos/a.mp4").unwrap(),
            PathBuf::from("/videos/a.mp4")
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_encode_then_decode(path in "/[a-zA-Z0-9 _#%?&'.-]{1,40}(/[a-zA-Z0-9 ._-]{1,20}){0,3}") {
            let url = encode_media_url(Path::new(&path));
            prop_assert_eq!(decode_media_url(&url).unwrap(), PathBuf::from(&path));
        }
    }
}
