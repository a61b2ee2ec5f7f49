//! Runtime configuration for the queue, network recovery and aggregation layers.
//!
//! Every component takes its own config struct by value at construction time.
//! [`FileConfig`] is the optional on-disk override layer read by the CLI; it
//! uses a flat `key = value` syntax so it stays readable without a TOML parser.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::network::RetryPolicy;
use crate::queue::LocatorPolicy;

/// Default number of jobs allowed in `downloading` at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default delay between successive dispatches within one drain pass.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// Consecutive job failures that open the circuit breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long the breaker stays open once tripped.
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Interval of the terminal-job cleanup sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Terminal jobs older than this are evicted by the sweep.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Per-attempt timeout for recovery fetches.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of a single locator availability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error records kept per resource.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Quiet window that collapses rapid source-set changes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Relay templates used to build alternative locators. `{url}` is replaced
/// with the percent-encoded original resource.
pub const DEFAULT_RELAY_TEMPLATES: [&str; 3] = [
    "https://api.allorigins.win/raw?url={url}",
    "https://corsproxy.io/?url={url}",
    "https://api.codetabs.com/v1/proxy?quest={url}",
];

/// Crawling service used when neither the CLI nor the config file names one.
pub const DEFAULT_CRAWLER_ENDPOINT: &str = "http://127.0.0.1:3001/crawl";

/// Download queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum jobs in `downloading` at any instant.
    pub max_concurrent: usize,
    /// Pause between two dispatches of the same drain pass.
    pub rate_limit_delay: Duration,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Breaker open duration.
    pub breaker_cooldown: Duration,
    /// Cleanup sweep period.
    pub cleanup_interval: Duration,
    /// Age after which terminal jobs are evicted.
    pub retention: Duration,
    /// Accept loopback/private hosts in submitted locators. Off outside tests.
    pub allow_private_hosts: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            breaker_cooldown: DEFAULT_BREAKER_COOLDOWN,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            retention: DEFAULT_JOB_RETENTION,
            allow_private_hosts: false,
        }
    }
}

/// Network recovery settings.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Default retry policy used when callers do not pass their own.
    pub retry: RetryPolicy,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
    /// Timeout of availability probes in `find_best_locator`.
    pub probe_timeout: Duration,
    /// Bounded error history length per resource.
    pub history_capacity: usize,
    /// Relay templates for alternative locators.
    pub relay_templates: Vec<String>,
    /// Host policy re-applied to every redirect hop.
    pub redirect_policy: LocatorPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            relay_templates: DEFAULT_RELAY_TEMPLATES
                .iter()
                .map(ToString::to_string)
                .collect(),
            redirect_policy: LocatorPolicy::strict(),
        }
    }
}

/// Aggregation pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Quiet window for source-set changes.
    pub debounce: Duration,
    /// Placeholder items synthesized for a source whose chain failed.
    pub placeholders_per_source: usize,
    /// Items per source flagged as `latest`.
    pub latest_per_source: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            placeholders_per_source: 1,
            latest_per_source: 3,
        }
    }
}

/// All runtime sections together, as assembled by the binary.
#[derive(Debug, Clone, Default)]
pub struct HarvesterConfig {
    /// Download queue section.
    pub queue: QueueConfig,
    /// Network recovery section.
    pub recovery: RecoveryConfig,
    /// Aggregation pipeline section.
    pub pipeline: PipelineConfig,
}

impl HarvesterConfig {
    /// Defaults with the file overrides applied.
    #[must_use]
    pub fn from_file(file: &FileConfig) -> Self {
        let mut config = Self::default();
        file.apply_to_queue(&mut config.queue);
        file.apply_to_recovery(&mut config.recovery);
        file.apply_to_pipeline(&mut config.pipeline);
        config
    }
}

/// Optional overrides read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Directory downloads are written to.
    pub output_dir: Option<PathBuf>,
    /// Directory holding persisted sources and queue snapshots.
    pub state_dir: Option<PathBuf>,
    /// Crawling collaborator endpoint.
    pub crawler_endpoint: Option<String>,
    /// Queue concurrency (1..=32).
    pub max_concurrent: Option<usize>,
    /// Dispatch spacing in milliseconds (0..=60000).
    pub rate_limit_ms: Option<u64>,
    /// Breaker threshold (1..=100).
    pub failure_threshold: Option<u32>,
    /// Breaker cooldown in seconds (1..=3600).
    pub breaker_cooldown_secs: Option<u64>,
    /// Recovery retries (0..=10).
    pub max_retries: Option<u32>,
    /// Per-attempt timeout in seconds (1..=300).
    pub attempt_timeout_secs: Option<u64>,
    /// Debounce window in milliseconds (0..=10000).
    pub debounce_ms: Option<u64>,
}

impl FileConfig {
    /// Validates values against the ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        check_range("max_concurrent", self.max_concurrent, 1, 32)?;
        check_range("rate_limit_ms", self.rate_limit_ms, 0, 60_000)?;
        check_range("failure_threshold", self.failure_threshold, 1, 100)?;
        check_range("breaker_cooldown_secs", self.breaker_cooldown_secs, 1, 3600)?;
        check_range("max_retries", self.max_retries, 0, 10)?;
        check_range("attempt_timeout_secs", self.attempt_timeout_secs, 1, 300)?;
        check_range("debounce_ms", self.debounce_ms, 0, 10_000)?;
        if let Some(endpoint) = &self.crawler_endpoint
            && url::Url::parse(endpoint).is_err()
        {
            bail!("Invalid config value for `crawler_endpoint`: '{endpoint}' is not a URL");
        }
        Ok(())
    }

    /// Applies the overrides on top of queue defaults.
    pub fn apply_to_queue(&self, config: &mut QueueConfig) {
        if let Some(value) = self.max_concurrent {
            config.max_concurrent = value;
        }
        if let Some(value) = self.rate_limit_ms {
            config.rate_limit_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.failure_threshold {
            config.failure_threshold = value;
        }
        if let Some(value) = self.breaker_cooldown_secs {
            config.breaker_cooldown = Duration::from_secs(value);
        }
    }

    /// Applies the overrides on top of recovery defaults.
    pub fn apply_to_recovery(&self, config: &mut RecoveryConfig) {
        if let Some(value) = self.max_retries {
            config.retry = config.retry.clone().with_max_retries(value);
        }
        if let Some(value) = self.attempt_timeout_secs {
            config.attempt_timeout = Duration::from_secs(value);
        }
    }

    /// Applies the overrides on top of pipeline defaults.
    pub fn apply_to_pipeline(&self, config: &mut PipelineConfig) {
        if let Some(value) = self.debounce_ms {
            config.debounce = Duration::from_millis(value);
        }
    }
}

fn check_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Ok(());
    };
    if value < min || value > max {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("harvester").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file at `path`, or the default path when `None`.
///
/// A missing file is not an error and yields `FileConfig::default()`.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) => path,
            None => return Ok(FileConfig::default()),
        },
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses `key = value` lines. `#` starts a comment outside of strings.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (index, raw_line) in raw.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "state_dir" => {
                cfg.state_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "crawler_endpoint" => {
                cfg.crawler_endpoint = Some(parse_string_literal(value).with_context(context)?);
            }
            "max_concurrent" => {
                let parsed = parse_integer(value).with_context(context)?;
                cfg.max_concurrent = Some(usize::try_from(parsed).with_context(context)?);
            }
            "rate_limit_ms" => cfg.rate_limit_ms = Some(parse_integer(value).with_context(context)?),
            "failure_threshold" => {
                let parsed = parse_integer(value).with_context(context)?;
                cfg.failure_threshold = Some(u32::try_from(parsed).with_context(context)?);
            }
            "breaker_cooldown_secs" => {
                cfg.breaker_cooldown_secs = Some(parse_integer(value).with_context(context)?);
            }
            "max_retries" => {
                let parsed = parse_integer(value).with_context(context)?;
                cfg.max_retries = Some(u32::try_from(parsed).with_context(context)?);
            }
            "attempt_timeout_secs" => {
                cfg.attempt_timeout_secs = Some(parse_integer(value).with_context(context)?);
            }
            "debounce_ms" => cfg.debounce_ms = Some(parse_integer(value).with_context(context)?),
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw: &str) -> Result<String> {
    if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw[1..raw.len() - 1].to_string())
}

fn parse_integer(raw: &str) -> Result<u64> {
    let token = raw.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.rate_limit_delay, Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.breaker_cooldown, Duration::from_secs(60));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_recovery_defaults_match_documented_values() {
        let config = RecoveryConfig::default();
        assert_eq!(config.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries(), 3);
        assert_eq!(config.relay_templates.len(), 3);
        assert!(config.relay_templates.iter().all(|t| t.contains("{url}")));
        assert_eq!(config.redirect_policy, LocatorPolicy::strict());
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            "max_concurrent = 4\n# comment\nrate_limit_ms = 250 # trailing\noutput_dir = \"/tmp/out\"\n",
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent, Some(4));
        assert_eq!(cfg.rate_limit_ms, Some(250));
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(cfg.failure_threshold, None);
    }

    #[test]
    fn test_parse_config_hash_inside_string_is_kept() {
        let cfg = parse_config_str("crawler_endpoint = \"https://crawler.test/api#frag\"").unwrap();
        assert_eq!(
            cfg.crawler_endpoint.as_deref(),
            Some("https://crawler.test/api#frag")
        );
    }

    #[test]
    fn test_parse_config_unknown_key_rejected() {
        let err = parse_config_str("colour = \"blue\"").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_parse_config_out_of_range_rejected() {
        let err = parse_config_str("max_concurrent = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrent"));
    }

    #[test]
    fn test_parse_config_missing_equals_reports_line() {
        let err = parse_config_str("max_concurrent = 2\nbroken line").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_apply_overrides() {
        let cfg = parse_config_str(
            "max_concurrent = 5\nrate_limit_ms = 0\nmax_retries = 1\ndebounce_ms = 50",
        )
        .unwrap();

        let mut queue = QueueConfig::default();
        cfg.apply_to_queue(&mut queue);
        assert_eq!(queue.max_concurrent, 5);
        assert_eq!(queue.rate_limit_delay, Duration::ZERO);

        let mut recovery = RecoveryConfig::default();
        cfg.apply_to_recovery(&mut recovery);
        assert_eq!(recovery.retry.max_retries(), 1);

        let mut pipeline = PipelineConfig::default();
        cfg.apply_to_pipeline(&mut pipeline);
        assert_eq!(pipeline.debounce, Duration::from_millis(50));
    }

    #[test]
    fn test_harvester_config_from_file_applies_every_section() {
        let cfg = parse_config_str("failure_threshold = 2\nattempt_timeout_secs = 3\ndebounce_ms = 0")
            .unwrap();
        let config = HarvesterConfig::from_file(&cfg);
        assert_eq!(config.queue.failure_threshold, 2);
        assert_eq!(config.queue.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.recovery.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.pipeline.debounce, Duration::ZERO);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_file_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, FileConfig::default());
    }
}
