use reqwest::Url;
use serde::{Serialize, Serializer};
use std::{
    fmt,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenditionKind {
    Hls,
    Dash,
    Progressive,
}

impl fmt::Display for RenditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hls => "hls",
            Self::Dash => "dash",
            Self::Progressive => "progressive",
        })
    }
}

/// Where the downloader reads a rendition from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    Remote(Url),
    /// Manifest cached in the scratch directory.
    File(PathBuf),
}

impl Locator {
    /// Argument handed to the downloader, cached files become `file://` urls.
    pub fn as_arg(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::File(path) => Url::from_file_path(path)
                .map(|x| x.to_string())
                .unwrap_or_else(|_| format!("file://{}", path.to_string_lossy())),
        }
    }

    pub fn cached_file(&self) -> Option<&Path> {
        match self {
            Self::Remote(_) => None,
            Self::File(path) => Some(path),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => f.write_str(&crate::utils::redact_url(url.as_str())),
            Self::File(_) => f.write_str(&self.as_arg()),
        }
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// One concrete quality variant of a lecture.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rendition {
    pub kind: RenditionKind,
    pub width: u32,
    pub height: u32,
    pub extension: String,
    pub locator: Locator,
    /// Remote playlist a cached locator was fetched from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Locator>,
    /// Downloader format selector, `video,audio` for DASH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    /// Bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
}

impl Rendition {
    /// Argument the downloader should fetch, remote playlists win over cached copies.
    pub fn download_arg(&self) -> String {
        match &self.source {
            Some(Locator::Remote(url)) if self.kind == RenditionKind::Hls => url.to_string(),
            _ => self.locator.as_arg(),
        }
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} {}",
            self.kind, self.width, self.height, self.extension
        )?;

        if let Some(bitrate) = self.bitrate {
            write!(f, " {:.0} kbps", bitrate as f64 / 1000.0)?;
        }

        if let Some(format_id) = &self.format_id {
            write!(f, " [{}]", format_id)?;
        }

        Ok(())
    }
}

/// Width of a standard 16:9 height, 256 for anything non standard.
pub fn width_for_height(height: u32) -> u32 {
    match height {
        2160 => 3840,
        1440 => 2560,
        1080 => 1920,
        720 => 1280,
        480 => 854,
        360 => 640,
        240 => 426,
        _ => 256,
    }
}
