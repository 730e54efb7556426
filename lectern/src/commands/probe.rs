use super::HttpArgs;
use crate::{
    config::{ProberKind, ToolPaths},
    http::{HeaderOverlay, HttpSession},
    manifest::{ExternalProber, FormatProber, ManifestResolver, NativeProber, ScratchDir},
    rendition::Rendition,
    tool::{SystemRunner, Tool, Toolchain},
};
use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use colored::Colorize;
use reqwest::Url;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ManifestKind {
    Hls,
    Dash,
}

impl ManifestKind {
    fn guess(url: &Url) -> Option<Self> {
        let path = url.path().to_lowercase();

        if path.ends_with(".m3u8") {
            Some(Self::Hls)
        } else if path.ends_with(".mpd") {
            Some(Self::Dash)
        } else {
            None
        }
    }
}

/// Resolve a single HLS or DASH url and list the renditions it offers.
#[derive(Debug, Clone, Args)]
pub struct Probe {
    /// http(s):// url of a .m3u8 or .mpd manifest.
    #[arg(required = true)]
    pub url: Url,

    /// Manifest type, guessed from the url extension by default.
    #[arg(long, value_enum)]
    pub kind: Option<ManifestKind>,

    /// Print renditions as json.
    #[arg(long)]
    pub json: bool,

    /// How formats of DASH manifests are listed.
    #[arg(long, value_enum, default_value_t = ProberKind::External)]
    pub prober: ProberKind,

    /// Scratch directory for fetched manifests.
    #[arg(long, default_value = "temp")]
    pub temp_dir: PathBuf,

    /// Path of the yt-dlp executable.
    #[arg(long)]
    pub yt_dlp: Option<PathBuf>,

    #[command(flatten)]
    pub http: HttpArgs,
}

impl Probe {
    pub fn execute(self) -> Result<()> {
        let Some(kind) = self.kind.or_else(|| ManifestKind::guess(&self.url)) else {
            bail!("couldn't determine manifest type, use --kind to specify it.");
        };

        let config = self.http.config();
        let http = HttpSession::from_config(&config)?;
        let scratch = ScratchDir::new(&self.temp_dir)?;
        let runner = SystemRunner::default();

        let required: &[Tool] = match (kind, self.prober) {
            (ManifestKind::Dash, ProberKind::External) => &[Tool::YtDlp],
            _ => &[],
        };
        let tools = Toolchain::locate(
            &ToolPaths {
                yt_dlp: self.yt_dlp.clone(),
                ..Default::default()
            },
            required,
        )?;

        let prober: Box<dyn FormatProber + '_> = match self.prober {
            ProberKind::External => Box::new(ExternalProber::new(&tools, &runner)),
            ProberKind::Native => Box::new(NativeProber),
        };

        let resolver = ManifestResolver::new(
            &http,
            &scratch,
            prober.as_ref(),
            HeaderOverlay::new(config.referer.clone(), config.origin.clone()),
        );

        let mut renditions = match kind {
            ManifestKind::Hls => resolver.resolve_hls(&self.url)?,
            ManifestKind::Dash => resolver.resolve_dash(&self.url)?,
        };
        crate::selector::sort_by_height(&mut renditions);

        if self.json {
            serde_json::to_writer_pretty(std::io::stdout(), &renditions)?;
            println!();
        } else {
            list_renditions(&renditions);
        }

        Ok(())
    }
}

fn list_renditions(renditions: &[Rendition]) {
    println!("------ {} ------", "Renditions".cyan());

    for (i, rendition) in renditions.iter().enumerate() {
        println!("{:>2}) {}", i + 1, rendition);
        println!("    {}", rendition.locator.to_string().dimmed());
    }
}
