/*
    REFERENCES
    ----------

    1. https://github.com/yt-dlp/yt-dlp#download-options
    2. https://aria2.github.io/manual/en/html/aria2c.html

*/

use crate::{
    failure::FailureReason,
    tool::{Invocation, Tool, ToolOutput, ToolRunner, Toolchain},
};
use log::{info, warn};
use std::{fmt, path::Path, time::Instant};

pub const ARIA2C_DOWNLOADER_ARGS: &str = "aria2c:--disable-ipv6 --connect-timeout=10 --timeout=30 --retry-wait=2 --max-tries=20 --max-connection-per-server=4";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// aria2c fetches fragments in parallel.
    Accelerated { concurrency: u32 },
    /// yt-dlp's own downloader, one fragment at a time.
    Native,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerated { concurrency } => {
                write!(f, "aria2c, concurrent_fragments={}", concurrency)
            }
            Self::Native => f.write_str("native, concurrent_fragments=1"),
        }
    }
}

/// What to hand to the fragment downloader.
#[derive(Clone, Debug)]
pub struct AcquireJob<'a> {
    pub source: String,
    /// Explicit format selector, `video,audio` for encrypted DASH.
    pub format: Option<&'a str>,
    /// yt-dlp output template relative to `work_dir`.
    pub output_template: String,
    pub work_dir: &'a Path,
    /// Keep fragments untouched, encrypted tracks must not be post processed.
    pub raw: bool,
    /// Container the finished file is remuxed into, fixing its final extension.
    pub remux: Option<&'a str>,
}

impl<'a> AcquireJob<'a> {
    /// Separate encrypted tracks named `<lecture_id>.encrypted.<ext>`.
    pub fn encrypted(source: String, format: &'a str, lecture_id: &str, work_dir: &'a Path) -> Self {
        Self {
            source,
            format: Some(format),
            output_template: format!("{}.encrypted.%(ext)s", lecture_id),
            work_dir,
            raw: true,
            remux: None,
        }
    }

    /// Single muxed file, always finished as `<stem>.mp4`.
    pub fn plain(source: String, stem: &str, work_dir: &'a Path) -> Self {
        Self {
            source,
            format: None,
            output_template: format!("{}.%(ext)s", stem),
            work_dir,
            raw: false,
            remux: Some("mp4"),
        }
    }
}

/// Downloads fragmented streams with yt-dlp, falling back once to the native downloader.
pub struct SegmentAcquirer<'a> {
    tools: &'a Toolchain,
    runner: &'a dyn ToolRunner,
    concurrency: u32,
}

impl<'a> SegmentAcquirer<'a> {
    pub fn new(tools: &'a Toolchain, runner: &'a dyn ToolRunner, concurrency: u32) -> Self {
        Self {
            tools,
            runner,
            concurrency,
        }
    }

    pub fn invocation(&self, job: &AcquireJob, strategy: Strategy) -> Invocation {
        let mut invocation = self
            .tools
            .invocation(Tool::YtDlp)
            .args([
                "--enable-file-urls",
                "--force-generic-extractor",
                "--allow-unplayable-formats",
                "--retries",
                "10",
                "--fragment-retries",
                "10",
                "--file-access-retries",
                "10",
            ])
            .current_dir(job.work_dir);

        invocation = match strategy {
            Strategy::Accelerated { concurrency } => invocation
                .arg("--concurrent-fragments")
                .arg(concurrency.to_string())
                .args(["--downloader", "aria2c", "--downloader-args"])
                .arg(ARIA2C_DOWNLOADER_ARGS),
            Strategy::Native => invocation.args(["--concurrent-fragments", "1"]),
        };

        if job.raw {
            invocation = invocation.args(["--fixup", "never", "-k"]);
        }

        if let Some(container) = job.remux {
            invocation = invocation.arg("--remux-video").arg(container);
        }

        invocation = invocation.arg("-o").arg(&job.output_template);

        if let Some(format) = job.format {
            invocation = invocation.arg("-f").arg(format);
        }

        invocation.arg(&job.source)
    }

    /// Run the job, returns the strategy which succeeded.
    pub fn acquire(&self, job: &AcquireJob) -> Result<Strategy, FailureReason> {
        let primary = Strategy::Accelerated {
            concurrency: self.concurrency,
        };
        let output = self.attempt(job, primary)?;

        if output.success() {
            return Ok(primary);
        }

        output.log_tails(Tool::YtDlp);
        warn!(
            "Return code from the downloader was non-0 (code={}), retrying without aria2c.",
            output.exit_code
        );

        let output = self.attempt(job, Strategy::Native)?;

        if output.success() {
            return Ok(Strategy::Native);
        }

        output.log_tails(Tool::YtDlp);
        Err(FailureReason::Download {
            tool: Tool::YtDlp.to_string(),
            code: output.exit_code,
        })
    }

    fn attempt(&self, job: &AcquireJob, strategy: Strategy) -> Result<ToolOutput, FailureReason> {
        let invocation = self.invocation(job, strategy);
        info!("Downloading with yt-dlp ({})", strategy);

        let start = Instant::now();
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| FailureReason::Unexpected(format!("{:#}", e)))?;

        info!(
            "yt-dlp finished in {:.1}s (code={})",
            start.elapsed().as_secs_f32(),
            output.exit_code
        );
        Ok(output)
    }

    /// Download a single progressive file with aria2c into `dir/file_name`.
    pub fn download_file(&self, url: &str, dir: &Path, file_name: &str) -> Result<(), FailureReason> {
        let invocation = self
            .tools
            .invocation(Tool::Aria2c)
            .arg(url)
            .arg("-o")
            .arg(file_name)
            .arg("-d")
            .arg(dir.to_string_lossy())
            .args([
                "-j16",
                "-s20",
                "-x16",
                "-c",
                "--auto-file-renaming=false",
                "--summary-interval=0",
                "--disable-ipv6",
                "--follow-torrent=false",
            ]);

        let start = Instant::now();
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| FailureReason::Unexpected(format!("{:#}", e)))?;

        if !output.success() {
            output.log_tails(Tool::Aria2c);
            return Err(FailureReason::Download {
                tool: Tool::Aria2c.to_string(),
                code: output.exit_code,
            });
        }

        info!(
            "aria2c finished in {:.1}s",
            start.elapsed().as_secs_f32()
        );
        Ok(())
    }
}
