use super::HttpArgs;
use crate::{
    batch::Batch,
    config::{
        self, BatchConfig, ChapterFilter, Config, DownloadConfig, PathsConfig, ProberKind,
        ToolPaths, TranscodeConfig,
    },
    course::Course,
    http::{HeaderOverlay, HttpSession},
    keystore::KeyStore,
    manifest::{ExternalProber, FormatProber, NativeProber, ScratchDir},
    pipeline::{LecturePipeline, Services},
    tool::{SystemRunner, Tool, Toolchain},
};
use anyhow::{Context, Result, bail};
use clap::Args;
use log::{info, warn};
use std::{fs, path::PathBuf, time::Instant};

/// Download every video lecture of a crawled course.
#[derive(Debug, Clone, Args)]
pub struct Download {
    /// Course json written by the curriculum crawler.
    #[arg(short, long)]
    pub course: PathBuf,

    /// Directory the course folder is created in.
    #[arg(short, long, default_value = "out_dir")]
    pub out_dir: PathBuf,

    /// Json file of KID:KEY pairs used for decryption.
    #[arg(short, long, default_value = "keyfile.json")]
    pub keyfile: PathBuf,

    /// Preferred video height (eg. 720, 720p or 1280x720), the nearest available one is used.
    /// By default the highest quality is downloaded.
    #[arg(short, long, help_heading = "Automation Options", value_parser = config::parse_quality)]
    pub quality: Option<u32>,

    /// Chapters to download, eg. "1,3-5,7".
    #[arg(long, help_heading = "Automation Options")]
    pub chapter: Option<ChapterFilter>,

    /// Skip HLS sources of plaintext lectures.
    #[arg(long, help_heading = "Automation Options")]
    pub skip_hls: bool,

    /// Name the course folder after the course id instead of its title.
    #[arg(long, help_heading = "Automation Options")]
    pub id_as_course_name: bool,

    /// Number of fragments downloaded in parallel, clamped to 1-30.
    #[arg(long, help_heading = "Download Options", default_value_t = 10, allow_negative_numbers = true)]
    pub concurrent_downloads: i64,

    /// How many times lectures still missing after the first pass are retried.
    #[arg(long, help_heading = "Download Options", default_value_t = 1)]
    pub retry_limit: u32,

    /// Exit with a non-zero status if any lecture is still failed after retries.
    #[arg(long, help_heading = "Download Options", env = "LECTERN_STRICT")]
    pub strict: bool,

    /// How formats of DASH manifests are listed.
    #[arg(long, help_heading = "Download Options", value_enum, default_value_t = ProberKind::External)]
    pub prober: ProberKind,

    /// Scratch directory for fetched manifests.
    #[arg(long, help_heading = "Download Options", default_value = "temp")]
    pub temp_dir: PathBuf,

    /// Keep the scratch directory contents on exit.
    #[arg(long, help_heading = "Download Options")]
    pub keep_temp: bool,

    /// Re-encode plaintext lectures to H.265 after download.
    #[arg(long, help_heading = "Encoding Options")]
    pub use_h265: bool,

    /// Constant rate factor of the H.265 encode.
    #[arg(long, help_heading = "Encoding Options", default_value_t = 28, value_parser = clap::value_parser!(u8).range(0..=51))]
    pub h265_crf: u8,

    /// Encoder preset of the H.265 encode.
    #[arg(long, help_heading = "Encoding Options", default_value = "medium")]
    pub h265_preset: String,

    /// Use the NVIDIA hardware encoder for H.265.
    #[arg(long, help_heading = "Encoding Options", requires = "use_h265")]
    pub use_nvenc: bool,

    #[command(flatten)]
    pub http: HttpArgs,

    /// Path of the yt-dlp executable.
    #[arg(long, help_heading = "Tool Options")]
    pub yt_dlp: Option<PathBuf>,

    /// Path of the aria2c executable.
    #[arg(long, help_heading = "Tool Options")]
    pub aria2c: Option<PathBuf>,

    /// Path of the ffmpeg executable.
    #[arg(long, help_heading = "Tool Options")]
    pub ffmpeg: Option<PathBuf>,

    /// Path of the shaka-packager executable.
    #[arg(long, help_heading = "Tool Options")]
    pub shaka_packager: Option<PathBuf>,
}

impl Download {
    pub fn config(&self) -> Config {
        Config {
            http: self.http.config(),
            download: DownloadConfig {
                concurrency: config::clamp_concurrency(self.concurrent_downloads),
                quality: self.quality,
                skip_hls: self.skip_hls,
                prober: self.prober,
            },
            transcode: TranscodeConfig {
                h265: self.use_h265,
                crf: self.h265_crf,
                preset: self.h265_preset.clone(),
                nvenc: self.use_nvenc,
            },
            batch: BatchConfig {
                chapters: self.chapter.clone(),
                retry_limit: self.retry_limit,
                strict: self.strict,
                id_as_course_name: self.id_as_course_name,
            },
            paths: PathsConfig {
                out_dir: self.out_dir.clone(),
                temp_dir: self.temp_dir.clone(),
                keyfile: self.keyfile.clone(),
                keep_temp: self.keep_temp,
            },
            tools: ToolPaths {
                yt_dlp: self.yt_dlp.clone(),
                aria2c: self.aria2c.clone(),
                ffmpeg: self.ffmpeg.clone(),
                shaka_packager: self.shaka_packager.clone(),
            },
        }
    }

    pub fn execute(self) -> Result<()> {
        let config = self.config();

        if self.concurrent_downloads != config.download.concurrency as i64 {
            warn!(
                "Concurrent downloads clamped from {} to {}",
                self.concurrent_downloads, config.download.concurrency
            );
        }

        let tools = Toolchain::locate(&config.tools, &Tool::ALL)?;
        let keys = KeyStore::load(&config.paths.keyfile)?;
        let course = Course::load(&self.course)?;
        let http = HttpSession::from_config(&config.http)?;
        let scratch = ScratchDir::new(&config.paths.temp_dir)?;
        let runner = SystemRunner::default();

        let prober: Box<dyn FormatProber + '_> = match config.download.prober {
            ProberKind::External => Box::new(ExternalProber::new(&tools, &runner)),
            ProberKind::Native => Box::new(NativeProber),
        };

        let overlay = HeaderOverlay::new(
            config.http.referer.clone().or(course.referer.clone()),
            config.http.origin.clone().or(course.origin.clone()),
        );

        let pipeline = LecturePipeline::new(
            &config,
            Services {
                http: &http,
                scratch: &scratch,
                prober: prober.as_ref(),
                keys: &keys,
                tools: &tools,
                runner: &runner,
            },
            overlay,
        );

        let course_dir = config
            .paths
            .out_dir
            .join(course.directory_name(config.batch.id_as_course_name));
        fs::create_dir_all(&course_dir)
            .with_context(|| format!("couldn't create {}", course_dir.display()))?;

        info!(
            "Downloading '{}' ({} chapters, {} lectures) into {}",
            course.title,
            course.chapters.len(),
            course.lecture_count(),
            course_dir.display()
        );

        let start = Instant::now();
        let mut batch = Batch::new(&config.batch);
        let result = batch.run(&pipeline, &course, &course_dir);

        if !config.paths.keep_temp
            && let Err(e) = scratch.purge()
        {
            warn!("Couldn't clean {}: {:#}", scratch.root().display(), e);
        }

        let report = result?;
        info!(
            "Finished in {:.1}s: {} downloaded, {} skipped, {} failed, {} still missing",
            start.elapsed().as_secs_f32(),
            report.completed,
            report.skipped,
            report.failed,
            report.missing.len()
        );

        if batch.strict_violation() {
            bail!(
                "{} lecture(s) still failed in strict mode.",
                batch.ledger().lecture_count()
            );
        }

        Ok(())
    }
}
