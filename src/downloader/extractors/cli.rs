// CLI engine - drives the native `yt-dlp` binary
//
// Metadata comes from `--dump-json`. Extractions run with `--newline` and a
// progress template so stdout can be consumed line by line; the engine prints
// the final title and path after moving the file into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::traits::{EngineConfig, ExtractedMedia, MediaEngine};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaInfo, StreamDescriptor};
use crate::downloader::plan::{EngineProcessor, ExtractionStep};
use crate::downloader::progress::{parse_progress_line, ProgressSink, PROGRESS_TEMPLATE};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::utils::{error_summary, run_output_with_timeout, spawn_piped};

const TITLE_PREFIX: &str = "[title] ";
const FILE_PREFIX: &str = "[file] ";

/// yt-dlp binary engine
pub struct YtDlpEngine {
    ytdlp_path: String,
    config: EngineConfig,
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            ytdlp_path: ToolManager::new().resolve_binary(ToolType::YtDlp),
            config,
        }
    }

    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Arguments for a metadata dump
    fn info_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.config.common_args());
        args.push(url.to_string());
        args
    }

    /// Arguments for one extraction step
    pub fn extract_args(&self, url: &str, step: &ExtractionStep, destination: &Path) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            step.format.clone(),
            "-o".to_string(),
            step.template_in(destination).to_string_lossy().to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "--no-mtime".to_string(),
            "--no-simulate".to_string(),
            "--print".to_string(),
            format!("after_move:{}%(title)s", TITLE_PREFIX),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", FILE_PREFIX),
        ];

        args.push(if step.playlist { "--yes-playlist" } else { "--no-playlist" }.to_string());

        if let Some(lang) = &step.subtitles {
            args.extend(
                ["--write-subs", "--write-auto-subs", "--sub-format", "vtt"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            if let Some(langs) = lang.engine_langs() {
                args.push("--sub-langs".to_string());
                args.push(langs.join(","));
            }
        }

        for processor in &step.processors {
            match processor {
                EngineProcessor::ExtractAudio { codec, quality } => {
                    args.push("-x".to_string());
                    args.push("--audio-format".to_string());
                    args.push(codec.to_string());
                    args.push("--audio-quality".to_string());
                    args.push(format!("{}K", quality));
                }
                EngineProcessor::ConvertVideo { container } => {
                    args.push("--recode-video".to_string());
                    args.push(container.to_string());
                }
            }
        }

        args.extend(self.config.common_args());
        args.push(url.to_string());
        args
    }

    /// Parse `--dump-json` output
    pub fn parse_json(stdout: &[u8]) -> Result<MediaInfo, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let json: serde_json::Value = serde_json::from_str(json_str.trim())
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

        Ok(MediaInfo {
            id: json["id"].as_str().unwrap_or("unknown").to_string(),
            title: json["title"].as_str().unwrap_or("Unknown").to_string(),
            uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0).max(0.0) as u64,
            thumbnail: json["thumbnail"].as_str().unwrap_or("").to_string(),
            webpage_url: json["webpage_url"].as_str().unwrap_or("").to_string(),
            streams: Self::parse_formats(&json),
        })
    }

    // A dump without a formats array (e.g. a direct file link) has no streams
    fn parse_formats(json: &serde_json::Value) -> Vec<StreamDescriptor> {
        let Some(formats) = json["formats"].as_array() else {
            return Vec::new();
        };

        formats
            .iter()
            .map(|f| StreamDescriptor {
                format_id: f["format_id"].as_str().unwrap_or("").to_string(),
                ext: f["ext"].as_str().unwrap_or("").to_string(),
                height: f["height"].as_u64().map(|h| h as u32),
                vcodec: f["vcodec"].as_str().map(|s| s.to_string()),
                acodec: f["acodec"].as_str().map(|s| s.to_string()),
                filesize: f["filesize"].as_u64(),
                filesize_approx: f["filesize_approx"]
                    .as_u64()
                    .or_else(|| f["filesize_approx"].as_f64().map(|v| v as u64)),
            })
            .collect()
    }
}

/// What one stdout line means to the caller
#[derive(Debug, PartialEq)]
enum OutputLine<'a> {
    Title(&'a str),
    File(&'a str),
    Other,
}

fn classify_line(line: &str) -> OutputLine<'_> {
    if let Some(title) = line.strip_prefix(TITLE_PREFIX) {
        OutputLine::Title(title.trim())
    } else if let Some(file) = line.strip_prefix(FILE_PREFIX) {
        OutputLine::File(file.trim())
    } else {
        OutputLine::Other
    }
}

/// Next line with invalid UTF-8 replaced; `None` at end of stream.
///
/// Titles and site banners are not guaranteed to be valid UTF-8, and one bad
/// byte must not end the read.
async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.ytdlp_path)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn fetch_info(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let args = self.info_args(url);
        log::info!("[extract] {} {}", self.ytdlp_path, args.join(" "));

        let out = run_output_with_timeout(&self.ytdlp_path, args, self.config.info_timeout).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            log::warn!("[extract] metadata dump failed: {}", stderr.trim());
            return Err(DownloadError::from(error_summary(&stderr)));
        }

        Self::parse_json(&out.stdout)
    }

    async fn extract(
        &self,
        url: &str,
        step: &ExtractionStep,
        destination: &Path,
        progress: &ProgressSink,
    ) -> Result<ExtractedMedia, DownloadError> {
        let args = self.extract_args(url, step, destination);
        log::info!("[extract] {}: {} {}", step.label, self.ytdlp_path, args.join(" "));

        let mut child = spawn_piped(&self.ytdlp_path, &args)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            DownloadError::ExecutionError("Failed to capture yt-dlp stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            DownloadError::ExecutionError("Failed to capture yt-dlp stderr".to_string())
        })?;

        // Quiet mode (implied by --print) can route progress to stderr, so both
        // streams feed the progress parser
        let stderr_sink = progress.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            let mut captured = String::new();
            while let Ok(Some(line)) = next_lossy_line(&mut reader, &mut buf).await {
                match parse_progress_line(&line) {
                    Some(hook) => stderr_sink.hook(&hook).await,
                    None => {
                        log::debug!("[extract] {}", line);
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                }
            }
            captured
        });

        let mut media = ExtractedMedia::default();
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = next_lossy_line(&mut reader, &mut buf).await? {
            if let Some(hook) = parse_progress_line(&line) {
                progress.hook(&hook).await;
                continue;
            }
            match classify_line(&line) {
                // Playlists print one title per entry; the last one wins
                OutputLine::Title(title) if !title.is_empty() => media.title = title.to_string(),
                OutputLine::File(file) if !file.is_empty() => media.files.push(PathBuf::from(file)),
                _ => log::debug!("[extract] {}", line),
            }
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let summary = error_summary(&stderr_text);
            log::warn!("[extract] {} failed ({}): {}", step.label, status, summary);
            return Err(DownloadError::from(summary));
        }

        log::info!("[extract] {} finished: {:?}", step.label, media.title);
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{DownloadIntent, DownloadMode, SubtitleLanguage};
    use crate::downloader::plan::PlanBuilder;

    fn engine() -> YtDlpEngine {
        YtDlpEngine::new(EngineConfig::default().with_proxy(Some("http://p:3128".into())))
            .with_binary("yt-dlp")
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_extract_args_for_audio_plan() {
        let intent = DownloadIntent::new("https://example.com/v", "/dl")
            .with_mode(DownloadMode::AudioOnly)
            .with_subtitles(Some(SubtitleLanguage::Code("en".into())));
        let plan = PlanBuilder::build(&intent);
        let args = engine().extract_args(&intent.url, &plan.extractions[0], Path::new("/dl"));

        assert!(has_pair(&args, "-f", "bestaudio[ext=m4a]/bestaudio/best"));
        assert!(has_pair(&args, "-o", "/dl/%(title)s.%(ext)s"));
        assert!(has_pair(&args, "--audio-format", "mp3"));
        assert!(has_pair(&args, "--audio-quality", "192K"));
        assert!(has_pair(&args, "--sub-langs", "en"));
        assert!(has_pair(&args, "--proxy", "http://p:3128"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--no-mtime".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
    }

    #[test]
    fn test_extract_args_all_subtitles() {
        let intent = DownloadIntent::new("https://example.com/v", "/dl")
            .with_subtitles(Some(SubtitleLanguage::All));
        let plan = PlanBuilder::build(&intent);
        let args = engine().extract_args(&intent.url, &plan.extractions[0], Path::new("/dl"));

        assert!(has_pair(&args, "--sub-langs", "all"));
        assert!(args.contains(&"--write-subs".to_string()));
    }

    #[test]
    fn test_extract_args_merge_and_playlist() {
        let intent = DownloadIntent::new("https://example.com/list", "/dl")
            .with_quality("720p (45 MB) [mp4]")
            .with_playlist(true)
            .with_subtitles(Some(SubtitleLanguage::Auto));
        let plan = PlanBuilder::build(&intent);
        let args = engine().extract_args(&intent.url, &plan.extractions[0], Path::new("/dl"));

        assert!(has_pair(&args, "--recode-video", "mp4"));
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert!(args.contains(&"--write-auto-subs".to_string()));
        assert!(!args.contains(&"--sub-langs".to_string()));
        assert!(!args.contains(&"-x".to_string()));
    }

    #[test]
    fn test_parse_json() {
        let dump = br#"{
            "id": "abc", "title": "Demo", "uploader": "Someone", "duration": 125.4,
            "thumbnail": "https://i/1.jpg", "webpage_url": "https://example.com/v",
            "formats": [
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "filesize": 100},
                {"format_id": "136", "ext": "mp4", "height": 720, "vcodec": "avc1", "acodec": "none", "filesize_approx": 47185920.7}
            ]
        }"#;
        let info = YtDlpEngine::parse_json(dump).unwrap();
        assert_eq!(info.title, "Demo");
        assert_eq!(info.duration_seconds, 125);
        assert_eq!(info.streams.len(), 2);
        assert_eq!(info.streams[1].height, Some(720));
        assert_eq!(info.streams[1].filesize_approx, Some(47_185_920));
        assert!(!info.streams[0].has_video());
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        let err = YtDlpEngine::parse_json(b"not json").unwrap_err();
        assert!(matches!(err, DownloadError::ParseError(_)));

        let bare = YtDlpEngine::parse_json(br#"{"title": "x"}"#).unwrap();
        assert!(bare.streams.is_empty());
        assert_eq!(bare.id, "unknown");
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("[title] My Song"), OutputLine::Title("My Song"));
        assert_eq!(classify_line("[file] /dl/My Song.mp3"), OutputLine::File("/dl/My Song.mp3"));
        assert_eq!(classify_line("[youtube] abc: Downloading"), OutputLine::Other);
    }

    #[tokio::test]
    async fn test_lines_survive_invalid_utf8() {
        let raw: &[u8] = b"[youtube] \xff\xfe banner\r\n[title] Caf\xe9\n[file] /dl/x.mp3";
        let mut reader = BufReader::new(raw);
        let mut buf = Vec::new();

        let mut lines = Vec::new();
        while let Some(line) = next_lossy_line(&mut reader, &mut buf).await.unwrap() {
            lines.push(line);
        }

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[youtube] \u{FFFD}\u{FFFD} banner");
        assert_eq!(classify_line(&lines[1]), OutputLine::Title("Caf\u{FFFD}"));
        assert_eq!(classify_line(&lines[2]), OutputLine::File("/dl/x.mp3"));
    }
}
