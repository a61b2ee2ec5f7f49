//! Deterministic alternative-locator generation.

use url::Url;

/// Builds the candidate list for `resource`.
///
/// Order: the `https` upgrade of an `http` resource first, then one relay
/// locator per template with `{url}` replaced by the percent-encoded original.
/// Duplicates and the original resource itself are never returned.
#[must_use]
pub fn alternative_locators(resource: &str, relay_templates: &[String]) -> Vec<String> {
    let mut candidates = Vec::with_capacity(relay_templates.len() + 1);

    if let Some(upgraded) = https_upgrade(resource) {
        candidates.push(upgraded);
    }

    let encoded = urlencoding::encode(resource);
    for template in relay_templates {
        let candidate = template.replace("{url}", &encoded);
        if candidate != resource && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}

fn https_upgrade(resource: &str) -> Option<String> {
    let mut url = Url::parse(resource).ok()?;
    if url.scheme() != "http" {
        return None;
    }
    url.set_scheme("https").ok()?;
    // Default port 80 is meaningless after the upgrade.
    if url.port() == Some(80) {
        url.set_port(None).ok()?;
    }
    Some(url.to_string())
}
