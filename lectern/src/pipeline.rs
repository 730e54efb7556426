use crate::{
    acquire::{AcquireJob, SegmentAcquirer},
    config::Config,
    course::LectureRecord,
    drm::{DrmMuxer, MuxJob},
    failure::FailureReason,
    http::{HeaderOverlay, HttpSession},
    keystore::KeyStore,
    manifest::{FormatProber, ManifestResolver, ScratchDir},
    rendition::{Locator, Rendition, RenditionKind, width_for_height},
    selector,
    tool::{ToolRunner, Toolchain},
    transcode::Transcoder,
};
use log::{debug, error, info, warn};
use reqwest::Url;
use std::{fs, path::Path};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LectureOutcome {
    /// Output was already present, nothing was touched.
    Skipped,
    Completed,
    Failed(FailureReason),
}

/// A lecture and where it should end up.
#[derive(Clone, Copy, Debug)]
pub struct LectureTask<'a> {
    pub lecture: &'a LectureRecord,
    pub output: &'a Path,
    /// Chapter directory, downloads and intermediates live here.
    pub work_dir: &'a Path,
}

pub trait LectureProcessor {
    fn process(&self, task: &LectureTask) -> LectureOutcome;
}

/// Collaborators shared by every lecture of a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub http: &'a HttpSession,
    pub scratch: &'a ScratchDir,
    pub prober: &'a dyn FormatProber,
    pub keys: &'a KeyStore,
    pub tools: &'a Toolchain,
    pub runner: &'a dyn ToolRunner,
}

/// Resolve, select, acquire and (for encrypted lectures) decrypt and merge one lecture.
pub struct LecturePipeline<'a> {
    config: &'a Config,
    resolver: ManifestResolver<'a>,
    acquirer: SegmentAcquirer<'a>,
    muxer: DrmMuxer<'a>,
    transcoder: Transcoder<'a>,
}

impl<'a> LecturePipeline<'a> {
    pub fn new(config: &'a Config, services: Services<'a>, overlay: HeaderOverlay) -> Self {
        Self {
            config,
            resolver: ManifestResolver::new(
                services.http,
                services.scratch,
                services.prober,
                overlay,
            ),
            acquirer: SegmentAcquirer::new(
                services.tools,
                services.runner,
                config.download.concurrency,
            ),
            muxer: DrmMuxer::new(services.tools, services.runner, services.keys),
            transcoder: Transcoder::new(&config.transcode, services.tools, services.runner),
        }
    }

    fn process_encrypted(&self, task: &LectureTask) -> Result<(), FailureReason> {
        let lecture = task.lecture;
        let mut renditions = self.resolve_encrypted(lecture)?;
        selector::sort_by_height(&mut renditions);
        let rendition = selector::select(&renditions, self.config.download.quality)
            .map_err(|_| FailureReason::MissingMedia)?;

        info!(
            "Lecture '{}' has DRM, attempting to download. Selected quality: {}",
            lecture.lecture_title, rendition
        );

        let format = rendition.format_id.as_deref().ok_or_else(|| {
            FailureReason::Unexpected("dash rendition without a format selector".to_owned())
        })?;

        let lecture_id = lecture.id.to_string();
        let job = AcquireJob::encrypted(
            rendition.locator.as_arg(),
            format,
            &lecture_id,
            task.work_dir,
        );
        self.acquirer.acquire(&job)?;

        let mut job = MuxJob::for_lecture(&lecture_id, task.work_dir, task.output);
        job.scratch_manifest = rendition.locator.cached_file();
        self.muxer.mux(&job)
    }

    fn resolve_encrypted(&self, lecture: &LectureRecord) -> Result<Vec<Rendition>, FailureReason> {
        let mut renditions = vec![];
        let mut errors = vec![];

        for source in lecture.media_sources.iter().filter(|x| x.is_dash()) {
            let Some(src) = &source.src else {
                continue;
            };

            match src
                .parse::<Url>()
                .map_err(anyhow::Error::from)
                .and_then(|x| self.resolver.resolve_dash(&x))
            {
                Ok(x) => renditions.extend(x),
                Err(e) => {
                    error!("Error fetching MPD streams: {:#}", e);
                    errors.push(format!("{:#}", e));
                }
            }
        }

        finish_resolution(renditions, errors)
    }

    fn resolve_plain(&self, lecture: &LectureRecord) -> Result<Vec<Rendition>, FailureReason> {
        let mut renditions = vec![];
        let mut errors = vec![];

        for source in &lecture.sources {
            let Some(file) = &source.file else {
                continue;
            };

            if source.is_audio() {
                continue;
            }

            let url = match file.parse::<Url>() {
                Ok(x) => x,
                Err(e) => {
                    warn!("Skipping source with invalid url {:?}: {}", file, e);
                    continue;
                }
            };

            if source.is_hls() {
                if self.config.download.skip_hls {
                    debug!("Skipping hls source of lecture {}", lecture.id);
                    continue;
                }

                match self.resolver.resolve_hls(&url) {
                    Ok(x) => renditions.extend(x),
                    Err(e) => {
                        error!("Error fetching HLS streams: {:#}", e);
                        errors.push(format!("{:#}", e));
                    }
                }
            } else {
                let height = source.height().unwrap_or_default();
                renditions.push(Rendition {
                    kind: RenditionKind::Progressive,
                    width: width_for_height(height),
                    height,
                    extension: source.extension(),
                    locator: Locator::Remote(url),
                    source: None,
                    format_id: None,
                    bitrate: None,
                });
            }
        }

        finish_resolution(renditions, errors)
    }

    fn process_plain(&self, task: &LectureTask) -> Result<(), FailureReason> {
        let lecture = task.lecture;
        let mut renditions = self.resolve_plain(lecture)?;
        selector::sort_by_height(&mut renditions);
        let rendition = selector::select(&renditions, self.config.download.quality)
            .map_err(|_| FailureReason::MissingMedia)?;

        info!(
            "Lecture '{}' doesn't have DRM, attempting to download. Selected quality: {}",
            lecture.lecture_title, rendition
        );

        match rendition.kind {
            RenditionKind::Hls => {
                let stem = format!("{}.hls", lecture.id);
                remove_leftovers(task.work_dir, &stem)?;

                let job = AcquireJob::plain(rendition.download_arg(), &stem, task.work_dir);
                if let Err(reason) = self.acquirer.acquire(&job) {
                    remove_leftovers(task.work_dir, &stem)?;
                    return Err(reason);
                }

                let produced = task.work_dir.join(format!("{}.mp4", stem));
                if !produced.is_file() {
                    return Err(FailureReason::Unexpected(format!(
                        "downloader reported success but {} doesn't exist",
                        produced.display()
                    )));
                }
                fs::rename(&produced, task.output)?;

                if let Some(cached) = rendition.locator.cached_file() {
                    let _ = fs::remove_file(cached);
                }
            }
            RenditionKind::Progressive | RenditionKind::Dash => {
                let temp = format!("{}.download.{}", lecture.id, rendition.extension);
                self.acquirer.download_file(
                    &rendition.locator.as_arg(),
                    task.work_dir,
                    &temp,
                )?;
                fs::rename(task.work_dir.join(&temp), task.output)?;
            }
        }

        info!("Downloaded {}", task.output.display());

        if self.transcoder.enabled() {
            match self.transcoder.transcode(task.output) {
                Ok(_) => (),
                Err(e) => warn!("Transcode of {} failed: {:#}", task.output.display(), e),
            }
        }

        Ok(())
    }
}

impl LectureProcessor for LecturePipeline<'_> {
    /// Returns without any network or tool use when the output already exists.
    fn process(&self, task: &LectureTask) -> LectureOutcome {
        let lecture = task.lecture;

        if task.output.is_file() {
            info!(
                "Lecture '{}' is already downloaded, skipping...",
                lecture.lecture_title
            );
            return LectureOutcome::Skipped;
        }

        let result = if lecture.is_encrypted {
            self.process_encrypted(task)
        } else {
            self.process_plain(task)
        };

        match result {
            Ok(()) => LectureOutcome::Completed,
            Err(reason) => {
                error!("Lecture '{}' failed: {}", lecture.lecture_title, reason);
                LectureOutcome::Failed(reason)
            }
        }
    }
}

fn finish_resolution(
    renditions: Vec<Rendition>,
    errors: Vec<String>,
) -> Result<Vec<Rendition>, FailureReason> {
    if !renditions.is_empty() {
        Ok(renditions)
    } else if errors.is_empty() {
        Err(FailureReason::MissingMedia)
    } else {
        Err(FailureReason::Resolution(errors.join("; ")))
    }
}

/// Delete every `<stem>.*` file in `dir`, such as fragments and partial downloads of an
/// earlier attempt. Returns how many were removed.
fn remove_leftovers(dir: &Path, stem: &str) -> Result<usize, FailureReason> {
    let prefix = format!("{}.", stem);
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|x| x.to_str())
            .is_some_and(|x| x.starts_with(&prefix));

        if matches && path.is_file() {
            fs::remove_file(&path)?;
            debug!("Deleted leftover {}", path.display());
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_outcomes() {
        assert_eq!(
            finish_resolution(vec![], vec![]),
            Err(FailureReason::MissingMedia)
        );
        assert_eq!(
            finish_resolution(vec![], vec!["403".to_owned(), "timeout".to_owned()]),
            Err(FailureReason::Resolution("403; timeout".to_owned()))
        );
    }

    #[test]
    fn leftovers_of_a_stem_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["7.hls.mp4.part-Frag3", "7.hls.mp4.part-Frag3.aria2", "7.hls.mp4"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(dir.path().join("71.hls.mp4"), b"").unwrap();
        fs::write(dir.path().join("001 Intro.mp4"), b"").unwrap();

        assert_eq!(remove_leftovers(dir.path(), "7.hls").unwrap(), 3);

        let mut names = fs::read_dir(dir.path())
            .unwrap()
            .map(|x| x.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["001 Intro.mp4", "71.hls.mp4"]);
    }
}
