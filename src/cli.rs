//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Aggregate media items from configured sources and optionally download them.
///
/// Harvester asks a crawling service (falling back to direct page extraction)
/// for every enabled source, prints the aggregated items and, with
/// `--download`, queues each media locator for delivery to disk.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON file with a list of sources; replaces the stored source list
    #[arg(short = 's', long, value_name = "PATH")]
    pub sources: Option<PathBuf>,

    /// Crawling service endpoint
    #[arg(long, value_name = "URL")]
    pub crawler: Option<String>,

    /// Directory downloaded files are written to
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory holding persisted sources and the queue snapshot
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Queue every aggregated media locator for download
    #[arg(short = 'd', long)]
    pub download: bool,

    /// Maximum concurrent downloads (1-32, default 3)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Maximum retry attempts for transient failures (0-10, default 3)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Delay between two dispatches in milliseconds (0 to disable, max 60000, default 1000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.download);
        assert!(args.concurrency.is_none());
        assert!(args.sources.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["harvester", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["harvester", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_paths_and_download() {
        let args = Args::try_parse_from([
            "harvester",
            "--sources",
            "sources.json",
            "-o",
            "out",
            "--crawler",
            "http://127.0.0.1:3001/crawl",
            "--download",
        ])
        .unwrap();
        assert_eq!(args.sources, Some(PathBuf::from("sources.json")));
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.crawler.as_deref(), Some("http://127.0.0.1:3001/crawl"));
        assert!(args.download);
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        assert!(Args::try_parse_from(["harvester", "-c", "0"]).is_err());
        assert!(Args::try_parse_from(["harvester", "-c", "33"]).is_err());
        let args = Args::try_parse_from(["harvester", "-c", "5"]).unwrap();
        assert_eq!(args.concurrency, Some(5));
    }

    #[test]
    fn test_cli_max_retries_and_rate_limit_bounds() {
        assert!(Args::try_parse_from(["harvester", "-r", "11"]).is_err());
        assert!(Args::try_parse_from(["harvester", "-l", "60001"]).is_err());
        let args = Args::try_parse_from(["harvester", "-r", "0", "-l", "0"]).unwrap();
        assert_eq!(args.max_retries, Some(0));
        assert_eq!(args.rate_limit, Some(0));
    }
}
