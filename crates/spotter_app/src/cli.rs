use std::path::PathBuf;

use clap::{ArgAction, Parser};
use engine_logging::LogDestination;
use log::LevelFilter;
use spotter_core::ExecutionTarget;
use url::Url;

/// Find the image on a website that best matches a reference image.
#[derive(Parser, Debug)]
#[command(name = "spotter", version, long_about = None)]
pub struct Cli {
    /// Page the crawl starts from; its domain bounds the crawl.
    pub start_url: Url,

    /// Reference image to search for.
    pub template: PathBuf,

    /// Base URL of a remote matching service, or `none` to match locally.
    pub target: ExecutionTarget,

    /// RON configuration file; fields it omits keep their defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More diagnostics (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write diagnostics to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn log_destination(&self) -> LogDestination {
        match &self.log_file {
            Some(path) => LogDestination::Both(path.clone()),
            None => LogDestination::Stderr,
        }
    }
}
