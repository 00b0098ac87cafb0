// Post-processing with ffmpeg: fast-start remux and stream-copy clipping
//
// Both operations copy streams without re-encoding. A remux writes a sibling
// `<stem>_fixed.mp4` and renames it over the original; a clip writes
// `<stem>_clip.<ext>` and leaves the source untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::{ClipRange, STREAMING_CONTAINER};
use super::tools::{ToolManager, ToolType};
use super::utils::{error_summary, run_output_with_timeout};

/// What a transcode job does to its input
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOp {
    /// Move the moov atom to the front for streaming playback
    Faststart,
    Clip(ClipRange),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub op: TranscodeOp,
}

impl TranscodeJob {
    /// ffmpeg arguments; existing outputs are overwritten
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
        ];

        match &self.op {
            TranscodeOp::Faststart => {
                args.extend(["-c", "copy", "-movflags", "faststart"].iter().map(|s| s.to_string()));
            }
            TranscodeOp::Clip(range) => {
                args.push("-ss".to_string());
                args.push(range.start_or_zero().to_ffmpeg());
                if let Some(end) = range.end {
                    args.push("-to".to_string());
                    args.push(end.to_ffmpeg());
                }
                args.push("-c".to_string());
                args.push("copy".to_string());
            }
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// External transcoder
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the job to completion; a non-zero exit is `TranscodeFailed`
    async fn run(&self, job: &TranscodeJob) -> Result<(), DownloadError>;
}

/// ffmpeg binary transcoder
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    timeout_secs: u64,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: ToolManager::new().resolve_binary(ToolType::Ffmpeg),
            timeout_secs: 3600,
        }
    }

    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn run(&self, job: &TranscodeJob) -> Result<(), DownloadError> {
        let args = job.ffmpeg_args();
        log::debug!("[ffmpeg] {} {}", self.ffmpeg_path, args.join(" "));

        let out = run_output_with_timeout(&self.ffmpeg_path, args, self.timeout_secs).await?;
        if !out.status.success() {
            return Err(DownloadError::TranscodeFailed {
                path: job.input.clone(),
                message: error_summary(&String::from_utf8_lossy(&out.stderr)),
            });
        }
        Ok(())
    }
}

/// `<dir>/<stem><tag>.<ext>` next to `path`
fn sibling(path: &Path, tag: &str, ext: Option<&str>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match ext {
        Some(ext) => format!("{}{}.{}", stem, tag, ext),
        None => format!("{}{}", stem, tag),
    };
    path.with_file_name(name)
}

fn is_streaming_container(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(STREAMING_CONTAINER))
}

/// Rewrite an mp4 in place with fast-start layout.
///
/// Returns `false` without touching the file for any other container.
pub async fn remux_faststart(transcoder: &dyn Transcoder, path: &Path) -> Result<bool, DownloadError> {
    if !is_streaming_container(path) {
        log::debug!("[remux] {} is not mp4, skipping", path.display());
        return Ok(false);
    }

    let fixed = sibling(path, "_fixed", Some(STREAMING_CONTAINER));
    let job = TranscodeJob {
        input: path.to_path_buf(),
        output: fixed.clone(),
        op: TranscodeOp::Faststart,
    };

    if let Err(e) = transcoder.run(&job).await {
        let _ = std::fs::remove_file(&fixed);
        return Err(e);
    }

    std::fs::rename(&fixed, path)?;
    log::info!("[remux] {} rewritten with faststart", path.display());
    Ok(true)
}

/// Cut `range` out of `path` into `<stem>_clip.<ext>`
pub async fn clip(transcoder: &dyn Transcoder, path: &Path, range: &ClipRange) -> Result<PathBuf, DownloadError> {
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    let output = sibling(path, "_clip", ext.as_deref());
    let job = TranscodeJob {
        input: path.to_path_buf(),
        output: output.clone(),
        op: TranscodeOp::Clip(*range),
    };

    if let Err(e) = transcoder.run(&job).await {
        let _ = std::fs::remove_file(&output);
        return Err(e);
    }
    log::info!("[clip] wrote {}", output.display());
    Ok(output)
}
