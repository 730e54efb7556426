/*
    REFERENCES
    ----------

    1. https://shaka-project.github.io/shaka-packager/html/tutorials/raw_key.html
    2. https://trac.ffmpeg.org/wiki/Map

*/

use crate::{
    failure::{FailureReason, Track},
    keystore::KeyStore,
    tool::{Tool, ToolRunner, Toolchain},
};
use log::{debug, info, warn};
use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};

/// Inputs and output of a single decrypt and merge.
#[derive(Clone, Debug)]
pub struct MuxJob<'a> {
    pub lecture_id: &'a str,
    /// Directory holding the encrypted tracks, intermediates are written here too.
    pub work_dir: &'a Path,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: &'a Path,
    /// Cached manifest the tracks were downloaded from.
    pub scratch_manifest: Option<&'a Path>,
}

impl<'a> MuxJob<'a> {
    /// Job for the tracks written by an encrypted acquisition of `lecture_id`.
    pub fn for_lecture(lecture_id: &'a str, work_dir: &'a Path, output: &'a Path) -> Self {
        Self {
            lecture_id,
            work_dir,
            video: work_dir.join(format!("{}.encrypted.mp4", lecture_id)),
            audio: work_dir.join(format!("{}.encrypted.m4a", lecture_id)),
            output,
            scratch_manifest: None,
        }
    }
}

/// Decrypts encrypted tracks with raw keys and merges them into the lecture file.
pub struct DrmMuxer<'a> {
    tools: &'a Toolchain,
    runner: &'a dyn ToolRunner,
    keys: &'a KeyStore,
}

impl<'a> DrmMuxer<'a> {
    pub fn new(tools: &'a Toolchain, runner: &'a dyn ToolRunner, keys: &'a KeyStore) -> Self {
        Self {
            tools,
            runner,
            keys,
        }
    }

    /// The output file exists afterwards only if every step succeeded.
    ///
    /// Decrypted intermediates and the cached manifest are removed on every exit path.
    /// Encrypted tracks are removed only on success.
    pub fn mux(&self, job: &MuxJob) -> Result<(), FailureReason> {
        let video_dec = format!("{}.video.dec.mp4", job.lecture_id);
        let audio_dec = format!("{}.audio.dec.mp4", job.lecture_id);
        let merged = format!("{}.muxing.mp4", job.lecture_id);

        let _cleanup = Cleanup {
            files: vec![
                job.work_dir.join(&video_dec),
                job.work_dir.join(&audio_dec),
                job.work_dir.join(&merged),
            ],
            scratch_manifest: job.scratch_manifest,
        };

        let video_kid = extract_kid(&job.video, Track::Video)?;
        info!("KID for video file is: {}", video_kid);
        let audio_kid = extract_kid(&job.audio, Track::Audio)?;
        info!("KID for audio file is: {}", audio_kid);

        let video_key = self.key(&video_kid, Track::Video)?;
        let audio_key = self.key(&audio_kid, Track::Audio)?;

        // stream descriptors are comma separated, so only bare names are passed
        let invocation = self
            .tools
            .invocation(Tool::ShakaPackager)
            .arg(format!(
                "in={},stream=video,output={},drm_label=VIDEO",
                file_name(&job.video),
                video_dec
            ))
            .arg(format!(
                "in={},stream=audio,output={},drm_label=AUDIO",
                file_name(&job.audio),
                audio_dec
            ))
            .arg("--enable_raw_key_decryption")
            .arg("--keys")
            .arg(format!(
                "label=VIDEO:key_id={}:key={},label=AUDIO:key_id={}:key={}",
                video_kid, video_key, audio_kid, audio_key
            ))
            .current_dir(job.work_dir);

        info!("Decrypting video and audio tracks");
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| FailureReason::Unexpected(format!("{:#}", e)))?;

        if !output.success() {
            output.log_tails(Tool::ShakaPackager);
            return Err(FailureReason::Packager {
                code: output.exit_code,
            });
        }

        let invocation = self
            .tools
            .invocation(Tool::Ffmpeg)
            .args(["-y", "-i"])
            .arg(&video_dec)
            .arg("-i")
            .arg(&audio_dec)
            .args([
                "-map",
                "0:v:0",
                "-map",
                "1:a:0",
                "-c",
                "copy",
                "-movflags",
                "+faststart",
            ])
            .arg(&merged)
            .current_dir(job.work_dir);

        info!("Merging video and audio tracks");
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| FailureReason::Unexpected(format!("{:#}", e)))?;

        if !output.success() {
            output.log_tails(Tool::Ffmpeg);
            return Err(FailureReason::Mux {
                code: output.exit_code,
            });
        }

        fs::rename(job.work_dir.join(&merged), job.output)?;
        info!("Merged into {}", job.output.display());

        remove_if_exists(&job.video);
        remove_if_exists(&job.audio);
        Ok(())
    }

    fn key(&self, kid: &str, track: Track) -> Result<&str, FailureReason> {
        self.keys.get(kid).ok_or_else(|| FailureReason::KeyNotFound {
            track,
            kid: kid.to_owned(),
        })
    }
}

fn extract_kid(path: &Path, track: Track) -> Result<String, FailureReason> {
    let kid = File::open(path)
        .map_err(lectern_mp4::Error::from)
        .and_then(|x| lectern_mp4::read_default_kid(BufReader::new(x)));

    match kid {
        Ok(Some(kid)) => Ok(kid),
        Ok(None) => Err(FailureReason::KidExtraction {
            track,
            detail: format!("no tenc box in {}", path.display()),
        }),
        Err(e) => Err(FailureReason::KidExtraction {
            track,
            detail: format!("{}: {}", path.display(), e),
        }),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => warn!("Couldn't delete {}: {}", path.display(), e),
    }
}

/// Removes intermediates when dropped, however `mux` returns.
struct Cleanup<'a> {
    files: Vec<PathBuf>,
    scratch_manifest: Option<&'a Path>,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        for file in &self.files {
            remove_if_exists(file);
        }

        if let Some(manifest) = self.scratch_manifest {
            remove_if_exists(manifest);
        }
    }
}
