//! Safe filename derivation for delivered items.

use std::path::{Path, PathBuf};

use url::Url;

use super::constants::PARTIAL_SUFFIX;

/// Longest stem kept before the extension.
const MAX_STEM_CHARS: usize = 120;

/// Numeric suffixes tried before falling back to a timestamped name.
const MAX_DUPLICATE_SUFFIX: usize = 1000;

/// Extension used when neither the locator nor the title suggests one.
const FALLBACK_EXTENSION: &str = "bin";

/// Derives a filesystem-safe filename from a job title and its locator.
///
/// The stem comes from the title (falling back to the last URL path segment,
/// then `download`); the extension comes from the locator path when it looks
/// like a real extension.
#[must_use]
pub fn safe_filename(title: &str, locator: &str) -> String {
    let url = Url::parse(locator).ok();
    let last_segment = url
        .as_ref()
        .and_then(|u| u.path_segments())
        .and_then(|mut segments| segments.next_back())
        .map(|s| urlencoding::decode(s).map_or_else(|_| s.to_string(), |d| d.into_owned()))
        .unwrap_or_default();

    let (segment_stem, extension) = split_extension(&last_segment);

    let mut stem = sanitize_filename_component(title);
    if stem.is_empty() {
        stem = sanitize_filename_component(segment_stem);
    }
    if stem.is_empty() {
        stem = "download".to_string();
    }
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim_end_matches(['_', '.']).to_string();

    let extension = extension.unwrap_or(FALLBACK_EXTENSION);
    format!("{stem}.{extension}")
}

fn split_extension(segment: &str) -> (&str, Option<&str>) {
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (segment, None),
    }
}

/// Replaces path separators, reserved and control characters with `_`,
/// collapsing runs.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(['_', '.']).to_string()
}

/// Resolves a path in `dir` that is not taken yet: `name.ext`, then
/// `name_2.ext`, `name_3.ext`, ... A name counts as taken while another
/// delivery holds its `.part` file.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let is_free = |path: &Path| !path.exists() && !partial_path_for(path).exists();

    let candidate = dir.join(filename);
    if is_free(&candidate) {
        return candidate;
    }
    let (stem, ext) = split_extension(filename);
    let with_suffix = |suffix: &str| match ext {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    for n in 2..MAX_DUPLICATE_SUFFIX {
        let candidate = dir.join(with_suffix(&n.to_string()));
        if is_free(&candidate) {
            return candidate;
        }
    }

    // Fallback (extremely unlikely)
    dir.join(with_suffix(&chrono::Utc::now().timestamp_millis().to_string()))
}

/// Path of the in-progress file for `final_path`.
pub(crate) fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
