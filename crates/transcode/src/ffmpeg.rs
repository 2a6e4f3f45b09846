use crate::error::{ErrorKind, Result};
use crate::{Transcoder, scratch_path};
use async_trait::async_trait;
use exn::ResultExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::instrument;

/// Re-encodes uploads with an external `ffmpeg` executable.
///
/// Output is H.264 (`ultrafast` preset, ~1000 kbit/s, 15 fps) with AAC audio
/// at 128 kbit/s in an MP4 container. The tool runs silently; only its exit
/// status is looked at.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    executable: PathBuf,
    timeout: Option<Duration>,
}
impl Ffmpeg {
    /// Use `executable` if given, otherwise search `PATH`.
    pub fn new(executable: Option<PathBuf>) -> Result<Self> {
        let executable = match executable {
            Some(path) => which::which(path).or_raise(|| ErrorKind::ToolNotFound)?,
            None => Self::discover()?,
        };
        tracing::debug!(ffmpeg = %executable.display(), "Using ffmpeg");
        Ok(Self { executable, timeout: None })
    }

    fn discover() -> Result<PathBuf> {
        for exe in ["ffmpeg", "ffmpeg.exe"] {
            if let Ok(path) = which::which(exe) {
                return Ok(path);
            }
        }
        tracing::info!("ffmpeg executable not found in PATH");
        exn::bail!(ErrorKind::ToolNotFound);
    }

    /// Kill the transcoder if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-loglevel", "quiet", "-i"].map(OsString::from).to_vec();
        args.push(source.into());
        args.extend(
            [
                "-c:v", "libx264", "-preset", "ultrafast", "-b:v", "1000k", "-r", "15", "-c:a", "aac", "-b:a", "128k",
                "-f", "mp4",
            ]
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    async fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child.wait().await.or_raise(|| ErrorKind::Io);
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.or_raise(|| ErrorKind::Io),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed-out transcoder");
                }
                exn::bail!(ErrorKind::Timeout(timeout))
            },
        }
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    #[instrument(skip_all, fields(source = %source.display()))]
    async fn transcode(&self, source: &Path) -> Result<Option<PathBuf>> {
        let output = scratch_path(source);
        let mut child = Command::new(&self.executable)
            .args(Self::args(source, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| ErrorKind::Io)?;

        let result = match self.wait(&mut child).await {
            Ok(status) if status.success() => match tokio::fs::try_exists(&output).await {
                Ok(true) => Ok(Some(output.clone())),
                Ok(false) => Err(ErrorKind::MissingOutput(output.clone()).into()),
                Err(e) => Err(e).or_raise(|| ErrorKind::Io),
            },
            Ok(status) => Err(ErrorKind::Failed(status.code().unwrap_or(-1)).into()),
            Err(e) => Err(e),
        };
        if result.is_err() {
            remove_partial(&output).await;
        }
        result
    }
}

async fn remove_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!(output = %output.display(), "Removed partial transcoder output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => tracing::warn!(output = %output.display(), error = %e, "Could not remove transcoder output"),
    }
}
