use anyhow::{Result, bail};
use clap::ValueEnum;
use std::{collections::BTreeSet, fmt, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";
pub const MIN_CONCURRENCY: u32 = 1;
pub const MAX_CONCURRENCY: u32 = 30;

/// Everything a run needs, resolved once at startup and never mutated.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub http: HttpConfig,
    pub download: DownloadConfig,
    pub transcode: TranscodeConfig,
    pub batch: BatchConfig,
    pub paths: PathsConfig,
    pub tools: ToolPaths,
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub user_agent: String,
    pub bearer: Option<String>,
    pub cookies: Option<PathBuf>,
    pub proxy: Option<String>,
    pub no_proxy: bool,
    pub connect_timeout: Duration,
    /// Deadline for a whole request, body included.
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Unit of the exponential backoff, `base * 2^attempt`.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            bearer: None,
            cookies: None,
            proxy: None,
            no_proxy: false,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(180),
            max_retries: 10,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            origin: None,
            referer: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProberKind {
    /// Ask yt-dlp for the format list of the manifest.
    #[default]
    External,
    /// Parse the DASH manifest in process.
    Native,
}

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    /// Fragment concurrency handed to the accelerated downloader, always within 1..=30.
    pub concurrency: u32,
    /// Preferred height, nearest available rendition wins.
    pub quality: Option<u32>,
    pub skip_hls: bool,
    pub prober: ProberKind,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            quality: None,
            skip_hls: false,
            prober: ProberKind::External,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub h265: bool,
    pub crf: u8,
    pub preset: String,
    pub nvenc: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            h265: false,
            crf: 28,
            preset: "medium".to_owned(),
            nvenc: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub chapters: Option<ChapterFilter>,
    /// Number of retry passes over lectures whose output is still missing.
    pub retry_limit: u32,
    pub strict: bool,
    pub id_as_course_name: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chapters: None,
            retry_limit: 1,
            strict: false,
            id_as_course_name: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PathsConfig {
    pub out_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub keyfile: PathBuf,
    pub keep_temp: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out_dir"),
            temp_dir: PathBuf::from("temp"),
            keyfile: PathBuf::from("keyfile.json"),
            keep_temp: false,
        }
    }
}

/// Explicit tool locations, anything left unset is searched in PATH.
#[derive(Clone, Debug, Default)]
pub struct ToolPaths {
    pub yt_dlp: Option<PathBuf>,
    pub aria2c: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub shaka_packager: Option<PathBuf>,
}

pub fn clamp_concurrency(value: i64) -> u32 {
    value.clamp(MIN_CONCURRENCY as i64, MAX_CONCURRENCY as i64) as u32
}

/// Set of 1-based chapter indices, written as `1,3-5`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChapterFilter(BTreeSet<u32>);

impl ChapterFilter {
    pub fn contains(&self, chapter_index: u32) -> bool {
        self.0.contains(&chapter_index)
    }
}

impl FromStr for ChapterFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chapters = BTreeSet::new();

        for part in s.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let start = parse_chapter(start)?;
                let end = parse_chapter(end)?;

                if start > end {
                    bail!("chapter range {} is reversed.", part);
                }

                chapters.extend(start..=end);
            } else {
                chapters.insert(parse_chapter(part)?);
            }
        }

        if chapters.is_empty() {
            bail!("chapter filter {:?} doesn't select any chapter.", s);
        }

        Ok(Self(chapters))
    }
}

impl fmt::Display for ChapterFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chapters = self
            .0
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&chapters)
    }
}

fn parse_chapter(s: &str) -> Result<u32> {
    match s.trim().parse::<u32>() {
        Ok(0) => bail!("chapter indices start at 1."),
        Ok(x) => Ok(x),
        Err(_) => bail!("could not parse chapter index {:?}.", s),
    }
}

/// Parse `720`, `720p` or `1280x720` into a target height.
pub fn parse_quality(s: &str) -> Result<u32> {
    let s = s.trim().to_lowercase();
    let height = match s.as_str() {
        "hd" => return Ok(720),
        "fhd" => return Ok(1080),
        x if x.ends_with('p') => x.trim_end_matches('p'),
        x => x.split_once('x').map(|(_, h)| h).unwrap_or(x),
    };

    height
        .parse::<u32>()
        .map_err(|_| anyhow::anyhow!("could not parse resolution HEIGHT from {:?}.", s))
}
