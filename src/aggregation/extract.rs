//! Lightweight media-link extraction from raw page bodies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Absolute or protocol-relative links ending in a known media extension.
#[allow(clippy::expect_used)]
static MEDIA_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?:)?//[^\s"'<>()/][^\s"'<>()]*?\.(?:mp4|m3u8|webm|mkv|mov|mpd|m4v)\b(?:\?[^\s"'<>()]*)?"#)
        .expect("media link regex is valid") // Static pattern, safe to panic
});

/// `src` attributes of `<video>` and `<source>` elements.
#[allow(clippy::expect_used)]
static MEDIA_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:video|source)\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("media tag regex is valid") // Static pattern, safe to panic
});

/// `og:video` style meta tags.
#[allow(clippy::expect_used)]
static OG_VIDEO_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?property\s*=\s*["']og:video(?::url|:secure_url)?["'][^>]*?content\s*=\s*["']([^"']+)["']"#)
        .expect("og:video regex is valid") // Static pattern, safe to panic
});

/// Extracts media links from `body`, resolved against `base` and de-duplicated
/// in first-seen order. Only `http`/`https` results are kept.
#[must_use]
pub fn extract_media_links(body: &str, base: &Url, limit: usize) -> Vec<String> {
    let tagged = MEDIA_TAG_PATTERN
        .captures_iter(body)
        .chain(OG_VIDEO_PATTERN.captures_iter(body))
        .filter_map(|c| c.get(1).map(|m| m.as_str()));
    let bare = MEDIA_LINK_PATTERN.find_iter(body).map(|m| m.as_str());

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for raw in tagged.chain(bare) {
        if links.len() >= limit {
            break;
        }
        let raw = raw.trim().replace("&amp;", "&");
        let Ok(resolved) = base.join(&raw) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://site.example.com/shows/page.html").unwrap()
    }

    #[test]
    fn test_extracts_tags_meta_and_bare_links() {
        let body = r#"
            <meta property="og:video" content="https://cdn.example.com/og.mp4">
            <video src="/media/intro.webm"></video>
            <source src='clips/part1.m3u8' type="application/x-mpegURL">
            <a href="https://cdn.example.com/movie.MKV?x=1&amp;y=2">download</a>
        "#;
        let links = extract_media_links(body, &base(), 10);
        assert_eq!(
            links,
            vec![
                "https://site.example.com/media/intro.webm",
                "https://site.example.com/shows/clips/part1.m3u8",
                "https://cdn.example.com/og.mp4",
                "https://cdn.example.com/movie.MKV?x=1&y=2",
            ]
        );
    }

    #[test]
    fn test_deduplicates_and_limits() {
        let body = "https://a.example.com/1.mp4 https://a.example.com/1.mp4 \
                    https://a.example.com/2.mp4 https://a.example.com/3.mp4";
        let links = extract_media_links(body, &base(), 2);
        assert_eq!(
            links,
            vec!["https://a.example.com/1.mp4", "https://a.example.com/2.mp4"]
        );
    }

    #[test]
    fn test_ignores_non_media_and_non_http() {
        let body = r#"<img src="/a.png"> <video src="javascript:alert(1).mp4"></video> text.mp4x"#;
        assert!(extract_media_links(body, &base(), 10).is_empty());
    }
}
