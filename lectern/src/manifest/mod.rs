//! Turns HLS and DASH manifest urls into cached, downloadable renditions.

mod dash;
mod hls;
mod probe;
mod scratch;

pub use dash::{DashSelection, select_formats};
pub use hls::distinct_variants;
pub use probe::{ExternalProber, FormatProber, NativeProber, ProbedFormat};
pub use scratch::ScratchDir;

use crate::{
    http::{HeaderOverlay, HttpSession},
    rendition::{Locator, Rendition, RenditionKind},
    utils,
};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use m3u8_rs::Playlist;
use reqwest::Url;

pub struct ManifestResolver<'a> {
    http: &'a HttpSession,
    scratch: &'a ScratchDir,
    prober: &'a dyn FormatProber,
    overlay: HeaderOverlay,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(
        http: &'a HttpSession,
        scratch: &'a ScratchDir,
        prober: &'a dyn FormatProber,
        overlay: HeaderOverlay,
    ) -> Self {
        Self {
            http,
            scratch,
            prober,
            overlay,
        }
    }

    /// Fetch a master playlist and cache one media playlist per distinct height.
    ///
    /// A variant whose media playlist can't be fetched is dropped.
    pub fn resolve_hls(&self, url: &Url) -> Result<Vec<Rendition>> {
        let asset = utils::asset_id(url.as_str());
        let text = self.http.get_text(url, &self.overlay)?;
        self.scratch
            .write(&self.scratch.master_playlist(&asset), text.as_bytes())?;

        let master = match m3u8_rs::parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MasterPlaylist(x)) => x,
            Ok(Playlist::MediaPlaylist(_)) => bail!(
                "{} is a media playlist, expected a master playlist.",
                utils::redact_url(url.as_str())
            ),
            Err(_) => bail!(
                "couldn't parse response ({}) as hls playlist.",
                utils::redact_url(url.as_str())
            ),
        };

        let mut renditions = vec![];

        for variant in distinct_variants(&master) {
            let Some(resolution) = &variant.resolution else {
                continue;
            };
            let width = u32::try_from(resolution.width).unwrap_or(u32::MAX);
            let height = u32::try_from(resolution.height).unwrap_or(u32::MAX);

            let variant_url = url
                .join(&variant.uri)
                .with_context(|| format!("invalid variant uri {}", variant.uri))?;

            let body = match self.http.get_text(&variant_url, &self.overlay) {
                Ok(x) => x,
                Err(e) => {
                    warn!("Skipping {}x{} variant: {}", width, height, e);
                    continue;
                }
            };

            let path = self.scratch.variant_playlist(&asset, width, height);
            self.scratch.write(&path, body.as_bytes())?;

            renditions.push(Rendition {
                kind: RenditionKind::Hls,
                width,
                height,
                extension: "mp4".to_owned(),
                locator: Locator::File(path),
                source: Some(Locator::Remote(variant_url)),
                format_id: None,
                bitrate: Some(variant.bandwidth),
            });
        }

        info!(
            "Resolved {} hls renditions from {}",
            renditions.len(),
            utils::redact_url(url.as_str())
        );
        Ok(renditions)
    }

    /// Fetch a DASH manifest, cache it and emit one rendition per video height.
    ///
    /// Every rendition pairs its video format with the best audio-only format.
    pub fn resolve_dash(&self, url: &Url) -> Result<Vec<Rendition>> {
        let asset = utils::asset_id(url.as_str());
        let response = self.http.get(url, &self.overlay)?;
        let path = self.scratch.dash_manifest(&asset);
        self.scratch.write(&path, &response.body)?;

        let formats = self
            .prober
            .probe(&path)
            .with_context(|| format!("couldn't list formats of {}", path.display()))?;
        debug!("Probed {} formats from {}", formats.len(), path.display());

        let selection = select_formats(&formats)?;
        let renditions = selection
            .videos
            .iter()
            .map(|video| {
                let height = video.height.unwrap_or_default();
                Rendition {
                    kind: RenditionKind::Dash,
                    width: video
                        .width
                        .unwrap_or_else(|| crate::rendition::width_for_height(height)),
                    height,
                    extension: video.ext.clone().unwrap_or_else(|| "mp4".to_owned()),
                    locator: Locator::File(path.clone()),
                    source: Some(Locator::Remote(url.clone())),
                    format_id: Some(format!(
                        "{},{}",
                        video.format_id, selection.audio.format_id
                    )),
                    bitrate: video.tbr.map(|x| (x * 1000.0) as u64),
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Resolved {} dash renditions from {}",
            renditions.len(),
            utils::redact_url(url.as_str())
        );
        Ok(renditions)
    }
}
