use crate::{
    config::TranscodeConfig,
    tool::{Invocation, Tool, ToolRunner, Toolchain},
};
use anyhow::Result;
use log::{error, info};
use std::{fs, path::Path};

/// Optional H.265 re-encode of a finished lecture, replacing it in place.
pub struct Transcoder<'a> {
    config: &'a TranscodeConfig,
    tools: &'a Toolchain,
    runner: &'a dyn ToolRunner,
}

impl<'a> Transcoder<'a> {
    pub fn new(config: &'a TranscodeConfig, tools: &'a Toolchain, runner: &'a dyn ToolRunner) -> Self {
        Self {
            config,
            tools,
            runner,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.h265
    }

    pub fn invocation(&self, input: &Path, output: &Path) -> Invocation {
        let mut invocation = self.tools.invocation(Tool::Ffmpeg);

        if self.config.nvenc {
            invocation = invocation.args(["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]);
        }

        invocation = invocation
            .arg("-y")
            .arg("-i")
            .arg(input.to_string_lossy());

        invocation = if self.config.nvenc {
            invocation
                .args(["-c:v", "hevc_nvenc", "-cq"])
                .arg(self.config.crf.to_string())
        } else {
            invocation
                .args(["-c:v", "libx265", "-crf"])
                .arg(self.config.crf.to_string())
        };

        invocation
            .arg("-preset")
            .arg(&self.config.preset)
            .args(["-c:a", "copy", "-f", "mp4"])
            .arg(output.to_string_lossy())
    }

    /// Returns whether `path` was replaced, the original is kept on failure.
    pub fn transcode(&self, path: &Path) -> Result<bool> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = Path::new(&temp);

        info!("Encoding {} with H.265", path.display());
        let output = self.runner.run(&self.invocation(path, temp))?;

        if !output.success() {
            output.log_tails(Tool::Ffmpeg);
            error!(
                "Encoding returned non-zero return code (code={}), keeping the original file.",
                output.exit_code
            );
            let _ = fs::remove_file(temp);
            return Ok(false);
        }

        fs::rename(temp, path)?;
        info!("Encoded {}", path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::SystemRunner;

    #[test]
    fn software_and_hardware_encoders() {
        let tools = Toolchain::default();
        let runner = SystemRunner::default();
        let mut config = TranscodeConfig {
            h265: true,
            crf: 24,
            preset: "slow".to_owned(),
            nvenc: false,
        };

        let invocation = Transcoder::new(&config, &tools, &runner)
            .invocation(Path::new("a.mp4"), Path::new("a.mp4.tmp"));
        assert_eq!(invocation.arg_value("-c:v"), Some("libx265"));
        assert_eq!(invocation.arg_value("-crf"), Some("24"));
        assert_eq!(invocation.arg_value("-preset"), Some("slow"));
        assert!(!invocation.has_arg("-hwaccel"));
        assert_eq!(invocation.args.last().map(|x| x.as_str()), Some("a.mp4.tmp"));

        config.nvenc = true;
        let invocation = Transcoder::new(&config, &tools, &runner)
            .invocation(Path::new("a.mp4"), Path::new("a.mp4.tmp"));
        assert_eq!(invocation.arg_value("-c:v"), Some("hevc_nvenc"));
        assert_eq!(invocation.arg_value("-cq"), Some("24"));
        assert_eq!(invocation.arg_value("-hwaccel"), Some("cuda"));
    }
}
