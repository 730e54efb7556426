mod download;
mod keys;
mod probe;

pub use download::Download;
pub use keys::Keys;
pub use probe::Probe;

use crate::{config::HttpConfig, logger::Logger};
use anyhow::Result;
use clap::{Args as ClapArgs, ColorChoice, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, debug};
use std::{
    io::{IsTerminal, stderr},
    path::PathBuf,
    time::Duration,
};

/// Download lecture videos of a crawled course, decrypting protected ones with known keys.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "lectern contributors", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Console log level.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Directory for the diagnostic log file of this run.
    #[arg(long, global = true, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Don't write a diagnostic log file.
    #[arg(long, global = true)]
    pub no_log_file: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Download(Download),
    Keys(Keys),
    Probe(Probe),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl Args {
    pub fn execute(self) -> Result<()> {
        colored::control::set_override(match self.color {
            ColorChoice::Always => true,
            ColorChoice::Auto => stderr().is_terminal(),
            ColorChoice::Never => false,
        });

        let log_dir = match self.command {
            Commands::Download(_) if !self.no_log_file => Some(self.log_dir.as_path()),
            _ => None,
        };

        if let Some(path) = Logger::init(self.log_level.into(), log_dir)? {
            debug!("Writing diagnostic log to {}", path.display());
        }

        match self.command {
            Commands::Download(args) => args.execute(),
            Commands::Keys(args) => args.execute(),
            Commands::Probe(args) => args.execute(),
        }
    }
}

/// Request options shared by every subcommand which talks to the network.
#[derive(Debug, Clone, ClapArgs)]
pub struct HttpArgs {
    /// Bearer token of the platform session.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_BEARER", hide_env_values = true)]
    pub bearer: Option<String>,

    /// Netscape formatted cookies.txt file.
    #[arg(long, help_heading = "Client Options")]
    pub cookies: Option<PathBuf>,

    /// Set http(s) / socks proxy address for requests.
    #[arg(long, help_heading = "Client Options", conflicts_with = "no_proxy")]
    pub proxy: Option<String>,

    /// Ignore proxies from the environment.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_NO_PROXY")]
    pub no_proxy: bool,

    /// Update and set user agent header for requests.
    #[arg(
        long,
        help_heading = "Client Options",
        env = "LECTERN_USER_AGENT",
        default_value = crate::config::DEFAULT_USER_AGENT
    )]
    pub user_agent: String,

    /// Origin header sent with manifest requests, overrides the course file.
    #[arg(long, help_heading = "Client Options")]
    pub origin: Option<String>,

    /// Referer header sent with manifest requests, overrides the course file.
    #[arg(long, help_heading = "Client Options")]
    pub referer: Option<String>,

    /// Connect timeout in seconds.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_CONNECT_TIMEOUT", default_value_t = 30)]
    pub connect_timeout: u64,

    /// Deadline in seconds for a whole request, from connecting until the body is read.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_REQUEST_TIMEOUT", default_value_t = 180)]
    pub request_timeout: u64,

    /// Maximum attempts of a request failing with a transient error.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_MAX_RETRIES", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: u32,

    /// Upper bound of the wait between retries in seconds.
    #[arg(long, help_heading = "Client Options", env = "LECTERN_RETRY_BACKOFF_MAX", default_value_t = 30)]
    pub retry_backoff_max: u64,
}

impl HttpArgs {
    pub fn config(&self) -> HttpConfig {
        HttpConfig {
            user_agent: self.user_agent.clone(),
            bearer: self.bearer.clone().filter(|x| !x.trim().is_empty()),
            cookies: self.cookies.clone(),
            proxy: self.proxy.clone(),
            no_proxy: self.no_proxy,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            max_retries: self.max_retries,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(self.retry_backoff_max),
            origin: self.origin.clone(),
            referer: self.referer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn connect_and_request_timeouts_are_separate() {
        let args = Args::try_parse_from([
            "lectern",
            "probe",
            "https://example.com/assets/1/index.m3u8",
            "--connect-timeout",
            "5",
            "--request-timeout",
            "45",
        ])
        .unwrap();

        let Commands::Probe(probe) = args.command else {
            panic!("expected the probe subcommand");
        };
        let config = probe.http.config();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
    }
}
