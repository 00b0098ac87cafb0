// Helper functions shared by the engine and the transcoder

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use filetime::FileTime;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};

use crate::downloader::errors::DownloadError;
use crate::downloader::plan::ExtractionStep;

/// Spawn `program`, mapping a missing binary to `ToolNotFound`
pub fn spawn_piped(program: &str, args: &[String]) -> Result<tokio::process::Child, DownloadError> {
    TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DownloadError::ToolNotFound(program.to_string()),
            _ => DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e)),
        })
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = spawn_piped(program, &args)?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout(timeout_secs))
        }
    }
}

/// The most useful line of a failed tool's stderr
pub fn error_summary(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_default()
}

/// First existing `<destination>/<stem><suffix>.<ext>` across the step's candidates
pub fn resolve_output(destination: &Path, step: &ExtractionStep, stem: &str) -> Option<PathBuf> {
    step.candidates
        .iter()
        .map(|ext| destination.join(step.file_name(stem, ext)))
        .find(|path| path.is_file())
}

/// Set access and modification time of the newest `*.ext` in `dir` to now.
///
/// Best effort: returns the touched file, or `None` when nothing matched or the
/// update failed.
pub fn touch_newest(dir: &Path, ext: &str) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("[touch] Cannot read {}: {}", dir.display(), e);
            return None;
        }
    };

    let wanted = ext.to_lowercase();
    let newest = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.to_lowercase() == wanted)
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let stamp = meta.created().or_else(|_| meta.modified()).ok()?;
            Some((stamp, entry.path()))
        })
        .max_by_key(|(stamp, _)| *stamp)
        .map(|(_, path)| path)?;

    let now = FileTime::from_system_time(SystemTime::now());
    match filetime::set_file_times(&newest, now, now) {
        Ok(()) => {
            log::debug!("[touch] Refreshed timestamps of {}", newest.display());
            Some(newest)
        }
        Err(e) => {
            log::warn!("[touch] Failed to refresh {}: {}", newest.display(), e);
            None
        }
    }
}
