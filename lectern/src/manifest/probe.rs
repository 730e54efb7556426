/*
    REFERENCES
    ----------

    1. https://github.com/yt-dlp/yt-dlp#output-template
    2. https://dashif.org/codecs/introduction

*/

use crate::{
    rendition::Locator,
    tool::{Tool, ToolRunner, Toolchain},
};
use anyhow::{Result, anyhow, bail};
use dash_mpd::{AdaptationSet, Representation};
use log::debug;
use serde::Deserialize;
use std::{fs, path::Path};

/// A downloadable format as reported by a prober.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProbedFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Total bitrate in kbit/s.
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
}

impl ProbedFormat {
    pub fn has_video(&self) -> bool {
        has_codec(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        has_codec(&self.acodec)
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video() && !self.has_audio()
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    pub fn bitrate(&self) -> f64 {
        self.tbr.unwrap_or(0.0)
    }
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|x| x != "none")
}

/// Lists the formats available in a cached manifest.
pub trait FormatProber {
    fn probe(&self, manifest: &Path) -> Result<Vec<ProbedFormat>>;
}

#[derive(Deserialize)]
struct ProbeInfo {
    #[serde(default)]
    formats: Vec<ProbedFormat>,
}

/// Asks yt-dlp for the format list, mirroring what it will later download.
pub struct ExternalProber<'a> {
    tools: &'a Toolchain,
    runner: &'a dyn ToolRunner,
}

impl<'a> ExternalProber<'a> {
    pub fn new(tools: &'a Toolchain, runner: &'a dyn ToolRunner) -> Self {
        Self { tools, runner }
    }
}

impl FormatProber for ExternalProber<'_> {
    fn probe(&self, manifest: &Path) -> Result<Vec<ProbedFormat>> {
        let invocation = self
            .tools
            .invocation(Tool::YtDlp)
            .args([
                "-J",
                "--no-warnings",
                "--enable-file-urls",
                "--force-generic-extractor",
                "--allow-unplayable-formats",
            ])
            .arg(Locator::File(manifest.to_owned()).as_arg())
            .capture_stdout();
        let output = self.runner.run(&invocation)?;

        if !output.success() {
            output.log_tails(Tool::YtDlp);
            bail!(
                "yt-dlp couldn't probe {} (code={}).",
                manifest.display(),
                output.exit_code
            );
        }

        let info = serde_json::from_str::<ProbeInfo>(&output.stdout)
            .map_err(|e| anyhow!("couldn't parse yt-dlp format list: {}", e))?;
        debug!("yt-dlp reported {} formats", info.formats.len());
        Ok(info.formats)
    }
}

/// Reads the DASH manifest in process.
pub struct NativeProber;

impl FormatProber for NativeProber {
    fn probe(&self, manifest: &Path) -> Result<Vec<ProbedFormat>> {
        let text = fs::read_to_string(manifest)?;
        let mpd = dash_mpd::parse(&text)
            .map_err(|_| anyhow!("couldn't parse {} as dash playlist.", manifest.display()))?;
        let mut formats = vec![];

        if let Some(period) = mpd.periods.first() {
            for (adaptation_index, adaptation_set) in period.adaptations.iter().enumerate() {
                for (representation_index, representation) in
                    adaptation_set.representations.iter().enumerate()
                {
                    formats.push(native_format(
                        adaptation_set,
                        representation,
                        adaptation_index,
                        representation_index,
                    ));
                }
            }
        }

        Ok(formats)
    }
}

fn native_format(
    adaptation_set: &AdaptationSet,
    representation: &Representation,
    adaptation_index: usize,
    representation_index: usize,
) -> ProbedFormat {
    let codecs = representation
        .codecs
        .clone()
        .or(adaptation_set.codecs.clone())
        .unwrap_or_else(|| "unknown".to_owned());

    let mime_type = representation
        .mimeType
        .clone()
        .or(adaptation_set.mimeType.clone())
        .or(representation.contentType.clone())
        .or(adaptation_set.contentType.clone())
        .unwrap_or_default();

    let (vcodec, acodec, ext) = match mime_type.split_once('/') {
        Some(("video", subtype)) => (Some(codecs), Some("none".to_owned()), subtype),
        Some(("audio", "mp4")) => (Some("none".to_owned()), Some(codecs), "m4a"),
        Some(("audio", subtype)) => (Some("none".to_owned()), Some(codecs), subtype),
        _ => (None, None, "unknown_video"),
    };

    ProbedFormat {
        format_id: representation
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", adaptation_index, representation_index)),
        ext: Some(ext.to_owned()),
        width: representation.width.and_then(|x| u32::try_from(x).ok()),
        height: representation.height.and_then(|x| u32::try_from(x).ok()),
        tbr: representation.bandwidth.map(|x| x as f64 / 1000.0),
        vcodec,
        acodec,
    }
}
