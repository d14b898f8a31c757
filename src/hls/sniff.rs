//! Decide whether an upstream response is an HLS playlist.
//!
//! Two stages: a cheap `Content-Type` allow-list check before buffering, and a
//! `#EXTM3U` marker check on the decoded text afterwards.

/// Playlist header marker every HLS document starts with
pub const EXTM3U_MARKER: &str = "#EXTM3U";

/// Content type returned for rewritten playlists
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Returns `true` when the media type of `content_type` is one of `recognized`.
///
/// Parameters such as `charset` are ignored and matching is case-insensitive.
/// `recognized` entries are expected to be lower-case.
pub fn is_playlist_content_type<S: AsRef<str>>(content_type: &str, recognized: &[S]) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    !media_type.is_empty() && recognized.iter().any(|r| r.as_ref() == media_type)
}

/// Returns `true` if `text` begins with the `#EXTM3U` marker.
///
/// A UTF-8 byte-order mark and leading whitespace are tolerated.
pub fn has_playlist_marker(text: &str) -> bool {
    text.trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with(EXTM3U_MARKER)
}

/// What the first bytes of a body say about it being a playlist
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaylistPrefix {
    /// Starts with `#EXTM3U`
    Playlist,
    /// Cannot start with `#EXTM3U`, whatever follows
    NotPlaylist,
    /// Too short to tell (empty, whitespace only, or a partial marker)
    Undecided,
}

/// Classify the start of a not-yet-complete, uncompressed body.
///
/// Mirrors [`has_playlist_marker`] on raw bytes: a UTF-8 BOM and leading ASCII
/// whitespace are skipped.
pub fn classify_prefix(bytes: &[u8]) -> PlaylistPrefix {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let rest = bytes.trim_ascii_start();
    let marker = EXTM3U_MARKER.as_bytes();

    if rest.starts_with(marker) {
        PlaylistPrefix::Playlist
    } else if marker.starts_with(rest) {
        PlaylistPrefix::Undecided
    } else {
        PlaylistPrefix::NotPlaylist
    }
}
