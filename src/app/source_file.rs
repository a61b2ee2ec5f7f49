//! Import of a source list from a JSON file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use harvester_core::SourceDescriptor;

/// Reads a JSON array of sources and validates every entry.
///
/// Duplicate ids are rejected so the registry never holds two entries for
/// the same source.
pub(crate) fn read_source_file(path: &Path) -> Result<Vec<SourceDescriptor>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources file '{}'", path.display()))?;
    parse_sources(&raw).with_context(|| format!("Invalid sources file '{}'", path.display()))
}

fn parse_sources(raw: &str) -> Result<Vec<SourceDescriptor>> {
    let sources: Vec<SourceDescriptor> =
        serde_json::from_str(raw).context("expected a JSON array of sources")?;
    let mut seen = std::collections::HashSet::new();
    for source in &sources {
        source.validate()?;
        if !seen.insert(source.id.as_str()) {
            bail!("duplicate source id '{}'", source.id);
        }
    }
    Ok(sources)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources_defaults_enabled() {
        let sources = parse_sources(
            r#"[{"id":"a","name":"A","endpoint":"https://a.example.com/"},
                {"id":"b","name":"B","endpoint":"https://b.example.com/","enabled":false}]"#,
        )
        .unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].enabled);
        assert!(!sources[1].enabled);
    }

    #[test]
    fn test_parse_sources_rejects_duplicates() {
        let err = parse_sources(
            r#"[{"id":"a","name":"A","endpoint":"https://a.example.com/"},
                {"id":"a","name":"A2","endpoint":"https://a2.example.com/"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_parse_sources_rejects_bad_endpoint() {
        assert!(parse_sources(r#"[{"id":"a","name":"A","endpoint":"ftp://a/"}]"#).is_err());
    }

    #[test]
    fn test_read_source_file_missing_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_source_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
