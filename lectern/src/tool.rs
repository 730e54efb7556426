use crate::{config::ToolPaths, utils};
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error};
use std::{
    collections::VecDeque,
    fmt,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

/// Bytes of stdout / stderr retained per invocation for diagnostics.
pub const TAIL_LIMIT: usize = 4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    Aria2c,
    Ffmpeg,
    ShakaPackager,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::YtDlp, Tool::Aria2c, Tool::Ffmpeg, Tool::ShakaPackager];

    pub fn binary(&self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::Aria2c => "aria2c",
            Self::Ffmpeg => "ffmpeg",
            Self::ShakaPackager => "shaka-packager",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Resolved executables of every external tool.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub yt_dlp: PathBuf,
    pub aria2c: PathBuf,
    pub ffmpeg: PathBuf,
    pub shaka_packager: PathBuf,
}

impl Default for Toolchain {
    /// Bare program names, left to the OS to resolve.
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from(Tool::YtDlp.binary()),
            aria2c: PathBuf::from(Tool::Aria2c.binary()),
            ffmpeg: PathBuf::from(Tool::Ffmpeg.binary()),
            shaka_packager: PathBuf::from(Tool::ShakaPackager.binary()),
        }
    }
}

impl Toolchain {
    /// Locate tools, failing if any of `required` is neither configured nor in PATH.
    pub fn locate(paths: &ToolPaths, required: &[Tool]) -> Result<Self> {
        let mut toolchain = Self::default();

        for tool in Tool::ALL {
            let configured = match tool {
                Tool::YtDlp => &paths.yt_dlp,
                Tool::Aria2c => &paths.aria2c,
                Tool::Ffmpeg => &paths.ffmpeg,
                Tool::ShakaPackager => &paths.shaka_packager,
            };

            let found = match configured {
                Some(path) if path.is_file() => Some(path.to_owned()),
                Some(path) => bail!("{} doesn't exist at {}.", tool, path.display()),
                None => utils::find_binary(tool.binary()),
            };

            match found {
                Some(path) => {
                    debug!("Using {} from {}", tool, path.display());
                    *toolchain.path_mut(tool) = path;
                }
                None if required.contains(&tool) => bail!(
                    "{} couldn't be found, it is required to continue further.",
                    tool
                ),
                None => (),
            }
        }

        Ok(toolchain)
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::YtDlp => &self.yt_dlp,
            Tool::Aria2c => &self.aria2c,
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::ShakaPackager => &self.shaka_packager,
        }
    }

    fn path_mut(&mut self, tool: Tool) -> &mut PathBuf {
        match tool {
            Tool::YtDlp => &mut self.yt_dlp,
            Tool::Aria2c => &mut self.aria2c,
            Tool::Ffmpeg => &mut self.ffmpeg,
            Tool::ShakaPackager => &mut self.shaka_packager,
        }
    }

    pub fn invocation(&self, tool: Tool) -> Invocation {
        Invocation::new(tool, self.path(tool))
    }
}

/// A single external process run.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Keep the complete stdout, needed when the tool prints json.
    pub capture_stdout: bool,
}

impl Invocation {
    pub fn new(tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            capture_stdout: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|x| x == arg)
    }

    /// Value following `flag`, if present.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|x| x == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|x| x.as_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&utils::format_command(&self.program, &self.args))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub exit_code: i32,
    /// Complete stdout, only filled for invocations which asked for it.
    pub stdout: String,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn log_tails(&self, tool: Tool) {
        if !self.stdout_tail.trim().is_empty() {
            error!("{} stdout (truncated):\n{}", tool, self.stdout_tail);
        }

        if !self.stderr_tail.trim().is_empty() {
            error!("{} stderr (truncated):\n{}", tool, self.stderr_tail);
        }
    }
}

/// Seam between the pipeline and the operating system's process table.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Spawns real processes, draining both pipes concurrently so neither can block the child.
pub struct SystemRunner {
    tail_limit: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            tail_limit: TAIL_LIMIT,
        }
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!("Executing {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("couldn't spawn {}", invocation.program.display()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tool = invocation.tool;
        let limit = self.tail_limit;
        let capture = invocation.capture_stdout;

        let (stdout, stderr) = thread::scope(|s| {
            let stdout = s.spawn(move || drain(stdout, tool, "stdout", limit, capture));
            let stderr = s.spawn(move || drain(stderr, tool, "stderr", limit, false));
            (stdout.join(), stderr.join())
        });

        let (full_stdout, stdout_tail) =
            stdout.map_err(|_| anyhow!("{} stdout reader panicked", tool))?;
        let (_, stderr_tail) = stderr.map_err(|_| anyhow!("{} stderr reader panicked", tool))?;

        let status = child
            .wait()
            .with_context(|| format!("couldn't wait for {}", tool))?;

        Ok(ToolOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: full_stdout,
            stdout_tail: stdout_tail.into_string(),
            stderr_tail: stderr_tail.into_string(),
        })
    }
}

fn drain(
    pipe: Option<impl Read>,
    tool: Tool,
    stream: &str,
    limit: usize,
    capture: bool,
) -> (String, TailBuffer) {
    let mut full = String::new();
    let mut tail = TailBuffer::new(limit);

    let Some(pipe) = pipe else {
        return (full, tail);
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();

        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);

                if capture {
                    full.push_str(line);
                    full.push('\n');
                } else {
                    debug!("[{}:{}] {}", tool, stream, line);
                }

                tail.push(line);
            }
        }
    }

    (full, tail)
}

/// Keeps roughly the last `limit` bytes of line oriented output.
#[derive(Debug)]
pub struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = if line.len() > self.limit {
            let mut start = line.len() - self.limit;
            while !line.is_char_boundary(start) {
                start += 1;
            }
            &line[start..]
        } else {
            line
        };

        self.bytes += line.len() + 1;
        self.lines.push_back(line.to_owned());

        while self.bytes > self.limit + 1 && self.lines.len() > 1 {
            if let Some(x) = self.lines.pop_front() {
                self.bytes -= x.len() + 1;
            }
        }
    }

    pub fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_buffer_keeps_latest_lines() {
        let mut tail = TailBuffer::new(10);

        for line in ["first", "second", "third", "fourth"] {
            tail.push(line);
        }

        let text = tail.into_string();
        assert!(text.len() <= 10);
        assert!(text.ends_with("fourth"));
        assert!(!text.contains("first"));
    }

    #[test]
    fn tail_buffer_truncates_long_lines() {
        let mut tail = TailBuffer::new(4);
        tail.push("abcdefgh");
        assert_eq!(tail.into_string(), "efgh");
    }

    #[test]
    fn invocation_builder_and_display() {
        let invocation = Toolchain::default()
            .invocation(Tool::Aria2c)
            .arg("https://example.com/video.mp4?Signature=abc")
            .args(["-o", "001 intro.mp4"]);

        assert!(invocation.has_arg("-o"));
        assert_eq!(invocation.arg_value("-o"), Some("001 intro.mp4"));
        assert_eq!(
            invocation.to_string(),
            "aria2c https://example.com/video.mp4?Signature=*** -o \"001 intro.mp4\""
        );
    }

    #[test]
    fn missing_required_tool_is_fatal() {
        let paths = ToolPaths {
            ffmpeg: Some(PathBuf::from("/definitely/not/here/ffmpeg")),
            ..Default::default()
        };

        assert!(Toolchain::locate(&paths, &[Tool::Ffmpeg]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_collects_exit_code_and_tails() {
        let invocation = Invocation::new(Tool::Ffmpeg, "sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .capture_stdout();
        let output = SystemRunner::default().run(&invocation).unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stdout_tail, "out");
        assert_eq!(output.stderr_tail, "err");
    }
}
