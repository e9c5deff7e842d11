//! Group key construction.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::hardlink::HardlinkIndex;
use crate::torrent_client::TorrentSnapshot;

/// Separator between key field values.
pub const KEY_SEPARATOR: char = '|';

/// Torrent attribute that contributes to a group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    ContentPath,
    SavePath,
    EffectiveName,
    Tracker,
    ReleaseAttributes,
    HardlinkSignature,
}

/// Named key field combinations.
pub const BUILTIN_KEYS: &[(&str, &[KeyField])] = &[
    ("cross_seed_content_path", &[KeyField::ContentPath]),
    (
        "cross_seed_content_save_path",
        &[KeyField::ContentPath, KeyField::SavePath],
    ),
    (
        "release_item",
        &[KeyField::EffectiveName, KeyField::ReleaseAttributes],
    ),
    (
        "tracker_release_item",
        &[
            KeyField::Tracker,
            KeyField::EffectiveName,
            KeyField::ReleaseAttributes,
        ],
    ),
    ("hardlink_signature", &[KeyField::HardlinkSignature]),
];

pub fn builtin_key(name: &str) -> Option<&'static [KeyField]> {
    BUILTIN_KEYS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, fields)| *fields)
}

/// Lowercase, forward slashes, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/").to_lowercase();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercase, `.`, `_` and `-` as spaces, collapsed whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['.', '_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "m2ts", "iso", "flac", "mp3", "m4a", "ogg",
    "epub", "mobi", "pdf", "cbz", "cbr", "zip", "rar", "7z",
];

/// Name without a trailing media extension, normalized.
pub fn effective_name(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => {
            stem
        }
        _ => name,
    };
    normalize_name(stem)
}

static RESOLUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(2160p|1080p|720p|576p|480p|4k|uhd)\b").unwrap());
static SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(remux|blu-?ray|bdrip|brrip|web-?dl|web-?rip|hdtv|dvdrip|hdrip)\b").unwrap()
});
static CODEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(x264|x265|h\.?264|h\.?265|hevc|avc|av1|xvid)\b").unwrap());

/// Resolution, source and codec tokens found in a release name.
pub fn release_attributes(name: &str) -> String {
    [&*RESOLUTION, &*SOURCE, &*CODEC]
        .iter()
        .filter_map(|re| re.find(name))
        .map(|m| m.as_str().to_lowercase().replace(['-', '.'], ""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_value(
    field: KeyField,
    torrent: &TorrentSnapshot,
    hardlinks: &HardlinkIndex,
) -> Option<String> {
    // An empty path or tracker means the client did not report it.
    let known = |value: String| Some(value).filter(|v| !v.is_empty());
    match field {
        KeyField::ContentPath => known(normalize_path(&torrent.content_path)),
        KeyField::SavePath => known(normalize_path(&torrent.save_path)),
        KeyField::EffectiveName => Some(effective_name(&torrent.name)),
        KeyField::Tracker => torrent.tracker_domain().and_then(known),
        KeyField::ReleaseAttributes => Some(release_attributes(&torrent.name)),
        KeyField::HardlinkSignature => hardlinks.signature(&torrent.hash).map(str::to_string),
    }
}

/// Build the torrent's key, or `None` if a field value is unknown.
pub fn group_key(
    fields: &[KeyField],
    torrent: &TorrentSnapshot,
    hardlinks: &HardlinkIndex,
) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        parts.push(field_value(*field, torrent, hardlinks)?);
    }
    Some(parts.join(&KEY_SEPARATOR.to_string()))
}

/// Content path and save path are both key fields and coincide.
pub fn is_ambiguous(fields: &[KeyField], torrent: &TorrentSnapshot) -> bool {
    fields.contains(&KeyField::ContentPath)
        && fields.contains(&KeyField::SavePath)
        && normalize_path(&torrent.content_path) == normalize_path(&torrent.save_path)
}
