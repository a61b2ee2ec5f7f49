//! Admission checks for submitted jobs.
//!
//! A locator must survive three gates, in order:
//! 1. pseudo-protocol deny-list, applied to a whitespace/case-normalized copy
//!    of the raw string so `" JaVa\tScript:"` is still caught;
//! 2. scheme allow-list (`http`, `https`);
//! 3. host block-list: `localhost`, loopback, unspecified, private, link-local,
//!    shared (CGNAT) and broadcast ranges, for IPv4 and IPv6.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

/// Longest accepted title, in characters.
pub const MAX_TITLE_CHARS: usize = 300;

/// Longest accepted category tag, in characters.
pub const MAX_CATEGORY_CHARS: usize = 32;

/// Category used when the caller supplies none.
pub const DEFAULT_CATEGORY: &str = "other";

/// Longest accepted locator, in bytes.
pub const MAX_LOCATOR_BYTES: usize = 8192;

/// Most redirect hops followed for one request.
pub const MAX_REDIRECTS: usize = 10;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

const SUSPICIOUS_SCHEMES: [&str; 7] = [
    "javascript:",
    "vbscript:",
    "data:",
    "file:",
    "blob:",
    "about:",
    "jar:",
];

/// Rejection reasons for a submission. Never enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Locator was empty or whitespace.
    #[error("locator is empty")]
    EmptyLocator,

    /// Locator exceeds [`MAX_LOCATOR_BYTES`].
    #[error("locator is longer than {MAX_LOCATOR_BYTES} bytes")]
    LocatorTooLong,

    /// Script-injection or local-content pseudo-protocol.
    #[error("suspicious scheme '{scheme}' is not allowed")]
    SuspiciousScheme {
        /// The matched scheme prefix.
        scheme: String,
    },

    /// Locator could not be parsed as a URL.
    #[error("malformed locator '{locator}': {reason}")]
    Malformed {
        /// The rejected locator.
        locator: String,
        /// Parser message.
        reason: String,
    },

    /// Scheme outside the allow-list.
    #[error("only http and https locators are allowed, got '{scheme}'")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// URL has no host.
    #[error("locator has no host")]
    MissingHost,

    /// Host is loopback or in a private/internal range.
    #[error("access to local or internal host '{host}' is not allowed")]
    BlockedHost {
        /// The rejected host.
        host: String,
    },

    /// Title failed validation.
    #[error("invalid title: {reason}")]
    InvalidTitle {
        /// Why.
        reason: String,
    },

    /// A response redirected more than [`MAX_REDIRECTS`] times.
    #[error("more than {MAX_REDIRECTS} redirects")]
    TooManyRedirects,

    /// Category tag failed validation.
    #[error("invalid category '{category}'")]
    InvalidCategory {
        /// The rejected tag.
        category: String,
    },
}

/// Host policy applied by [`validate_locator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocatorPolicy {
    /// Skip the host block-list. Only for tests against local mock servers.
    pub allow_private_hosts: bool,
}

impl LocatorPolicy {
    /// The production policy: block-list enforced.
    #[must_use]
    pub fn strict() -> Self {
        Self::default()
    }

    /// Policy that accepts loopback and private hosts.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow_private_hosts: true,
        }
    }

    /// Redirect policy that re-validates every hop against this policy, so a
    /// public locator cannot bounce a request onto a blocked host.
    #[must_use]
    pub fn redirect_policy(self) -> reqwest::redirect::Policy {
        reqwest::redirect::Policy::custom(move |attempt| {
            match self.check_redirect(attempt.url(), attempt.previous().len()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        })
    }

    /// Decides whether the hop to `next` may be followed after `hops_so_far`
    /// earlier requests.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TooManyRedirects`] past [`MAX_REDIRECTS`],
    /// otherwise whatever [`validate_locator`] rejects `next` with.
    pub fn check_redirect(self, next: &Url, hops_so_far: usize) -> Result<(), ValidationError> {
        if hops_so_far > MAX_REDIRECTS {
            return Err(ValidationError::TooManyRedirects);
        }
        validate_locator(next.as_str(), self).map(|_| ())
    }
}

/// Validates a delivery locator and returns the parsed URL.
///
/// # Errors
///
/// Returns the first [`ValidationError`] gate that rejects the input.
pub fn validate_locator(raw: &str, policy: LocatorPolicy) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyLocator);
    }
    if trimmed.len() > MAX_LOCATOR_BYTES {
        return Err(ValidationError::LocatorTooLong);
    }

    let normalized: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect();
    if let Some(scheme) = SUSPICIOUS_SCHEMES.iter().find(|s| normalized.starts_with(*s)) {
        return Err(ValidationError::SuspiciousScheme {
            scheme: scheme.trim_end_matches(':').to_string(),
        });
    }

    let url = Url::parse(trimmed).map_err(|e| ValidationError::Malformed {
        locator: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
        });
    }

    let host = url.host().ok_or(ValidationError::MissingHost)?;
    if !policy.allow_private_hosts && is_blocked_host(&host) {
        return Err(ValidationError::BlockedHost {
            host: host.to_string(),
        });
    }

    Ok(url)
}

/// Validates and normalizes a job title.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTitle`] for empty or overlong titles.
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidTitle {
            reason: "title is empty".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::InvalidTitle {
            reason: format!("title is longer than {MAX_TITLE_CHARS} characters"),
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidTitle {
            reason: "title contains control characters".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Normalizes a category tag: trimmed and lowercased, [`DEFAULT_CATEGORY`]
/// when blank.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidCategory`] for overlong tags or tags with
/// characters other than ASCII alphanumerics, `-` and `_`.
pub fn validate_category(category: &str) -> Result<String, ValidationError> {
    let trimmed = category.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Ok(DEFAULT_CATEGORY.to_string());
    }
    let valid = trimmed.chars().count() <= MAX_CATEGORY_CHARS
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !valid {
        return Err(ValidationError::InvalidCategory {
            category: category.to_string(),
        });
    }
    Ok(trimmed)
}

fn is_blocked_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain == "localhost.localdomain"
                || domain.ends_with(".internal")
                || domain.ends_with(".local")
        }
        Host::Ipv4(ip) => is_blocked_ipv4(*ip),
        Host::Ipv6(ip) => is_blocked_ipv6(*ip),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (64..=127).contains(&b))
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
