//! Content items synthesized from source fetches.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::crawler::CrawledItem;
use super::source::SourceDescriptor;

/// Season/episode markers that classify an item as a series.
#[allow(clippy::expect_used)]
static SERIES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(season|episode|series|s\d{1,2}\s*e\d{1,3}|ep\.?\s*\d+)\b")
        .expect("series marker regex is valid") // Static pattern, safe to panic
});

/// Broad content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    /// Standalone video.
    Movie,
    /// Part of a series.
    Series,
    /// Anything without a media locator.
    Other,
}

impl ItemCategory {
    /// Infers a category from the title and whether a media locator exists.
    #[must_use]
    pub fn infer(title: &str, media_locator: Option<&str>) -> Self {
        if SERIES_PATTERN.is_match(title) || media_locator.is_some_and(|m| SERIES_PATTERN.is_match(m)) {
            Self::Series
        } else if media_locator.is_some() {
            Self::Movie
        } else {
            Self::Other
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification flags attached to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFlag {
    /// Among the first items of its source.
    Latest,
    /// Featured pick.
    EditorPick,
    /// Stand-in for a source that could not be fetched.
    Placeholder,
}

/// One aggregated item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// `"{source_id}-{ordinal}"`.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Thumbnail locator.
    pub image: Option<String>,
    /// Locator to submit to the download queue.
    pub media_locator: Option<String>,
    /// Inferred category.
    pub category: ItemCategory,
    /// Id of the source this item came from.
    pub source_id: String,
    /// Classification flags.
    pub flags: Vec<ItemFlag>,
}

impl ContentItem {
    fn synthesize(
        source: &SourceDescriptor,
        ordinal: usize,
        title: String,
        description: String,
        image: Option<String>,
        media_locator: Option<String>,
    ) -> Self {
        let category = ItemCategory::infer(&title, media_locator.as_deref());
        Self {
            id: format!("{}-{ordinal}", source.id),
            title,
            description,
            image,
            media_locator,
            category,
            source_id: source.id.clone(),
            flags: Vec::new(),
        }
    }

    /// Builds an item from a crawler record.
    #[must_use]
    pub fn from_crawled(source: &SourceDescriptor, ordinal: usize, crawled: CrawledItem) -> Self {
        let title = non_blank(crawled.title)
            .unwrap_or_else(|| format!("{} #{}", source.name, ordinal + 1));
        Self::synthesize(
            source,
            ordinal,
            title,
            crawled.description.unwrap_or_default(),
            non_blank(crawled.image),
            non_blank(crawled.video_url),
        )
    }

    /// Builds an item from a media link found in a page body.
    #[must_use]
    pub fn from_media_link(source: &SourceDescriptor, ordinal: usize, link: String) -> Self {
        let title = link
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
            .map(|segment| urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |d| d.into_owned()))
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| format!("{} #{}", source.name, ordinal + 1));
        Self::synthesize(
            source,
            ordinal,
            title,
            format!("Media found on {}", source.name),
            None,
            Some(link),
        )
    }

    /// Labelled stand-in for a source whose every strategy failed.
    #[must_use]
    pub fn placeholder(source: &SourceDescriptor, ordinal: usize, reason: &str) -> Self {
        let mut item = Self::synthesize(
            source,
            ordinal,
            format!("{} is unavailable", source.name),
            format!("Content from {} could not be loaded: {reason}", source.name),
            None,
            None,
        );
        item.flags.push(ItemFlag::Placeholder);
        item
    }

    /// Whether the item carries `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: ItemFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub(crate) fn add_flag(&mut self, flag: ItemFlag) {
        if !self.has_flag(flag) {
            self.flags.push(flag);
        }
    }
}

/// Flags the first `count` non-placeholder items of one source as latest.
pub(crate) fn flag_latest(items: &mut [ContentItem], count: usize) {
    for item in items
        .iter_mut()
        .filter(|item| !item.has_flag(ItemFlag::Placeholder))
        .take(count)
    {
        item.add_flag(ItemFlag::Latest);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("src", "Source", "https://src.example.com/")
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(ItemCategory::infer("Show S01E02", Some("https://a/v.mp4")), ItemCategory::Series);
        assert_eq!(ItemCategory::infer("Season 2 finale", None), ItemCategory::Series);
        assert_eq!(ItemCategory::infer("A film", Some("https://a/v.mp4")), ItemCategory::Movie);
        assert_eq!(ItemCategory::infer("A page", None), ItemCategory::Other);
        assert_eq!(ItemCategory::infer("Seasonal sale", None), ItemCategory::Other);
    }

    #[test]
    fn test_from_crawled_fills_blanks() {
        let crawled = CrawledItem {
            title: Some("  ".to_string()),
            image: Some(String::new()),
            description: None,
            video_url: Some("https://cdn.test/v.mp4".to_string()),
        };
        let item = ContentItem::from_crawled(&source(), 4, crawled);
        assert_eq!(item.id, "src-4");
        assert_eq!(item.title, "Source #5");
        assert_eq!(item.image, None);
        assert_eq!(item.category, ItemCategory::Movie);
        assert!(item.flags.is_empty());
    }

    #[test]
    fn test_media_link_title_from_last_segment() {
        let item = ContentItem::from_media_link(
            &source(),
            0,
            "https://cdn.test/videos/My%20Clip.mp4?token=1".to_string(),
        );
        assert_eq!(item.title, "My Clip.mp4");
        assert_eq!(item.media_locator.as_deref(), Some("https://cdn.test/videos/My%20Clip.mp4?token=1"));
    }

    #[test]
    fn test_placeholder_is_labelled() {
        let item = ContentItem::placeholder(&source(), 0, "timeout");
        assert!(item.has_flag(ItemFlag::Placeholder));
        assert!(item.title.contains("Source"));
        assert!(item.description.contains("timeout"));
        assert_eq!(item.category, ItemCategory::Other);
    }

    #[test]
    fn test_flag_latest_skips_placeholders() {
        let s = source();
        let mut items = vec![
            ContentItem::placeholder(&s, 0, "x"),
            ContentItem::from_media_link(&s, 1, "https://a.test/1.mp4".to_string()),
            ContentItem::from_media_link(&s, 2, "https://a.test/2.mp4".to_string()),
        ];
        flag_latest(&mut items, 1);
        assert!(!items[0].has_flag(ItemFlag::Latest));
        assert!(items[1].has_flag(ItemFlag::Latest));
        assert!(!items[2].has_flag(ItemFlag::Latest));
    }
}
