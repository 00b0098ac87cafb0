// Common data models for the download pipeline

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;

/// Container used for audio-only downloads (transcoded by the engine)
pub const AUDIO_CONTAINER: &str = "mp3";

/// Container that gets the fast-start remux
pub const STREAMING_CONTAINER: &str = "mp4";

/// Video containers the resolver offers as (height, container) pairs
pub const VIDEO_CONTAINERS: [&str; 3] = ["mp4", "webm", "mkv"];

/// Separator between the video and audio paths of a separate-streams job
pub const PATH_SEPARATOR: &str = " ; ";

/// One raw stream descriptor as reported by the engine's metadata dump
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Format ID (e.g., "137", "140")
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    pub ext: String,
    /// Video height in pixels
    pub height: Option<u32>,
    /// Video codec (avc1, vp9, av01, none)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    /// File size in bytes
    pub filesize: Option<u64>,
    /// Approximate file size (when exact is unknown)
    pub filesize_approx: Option<u64>,
}

impl StreamDescriptor {
    /// Approximate size first, exact size as fallback
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize_approx.or(self.filesize).filter(|s| *s > 0)
    }

    /// Whether the stream carries a video track
    pub fn has_video(&self) -> bool {
        self.vcodec
            .as_deref()
            .map_or(false, |v| v != "none" && !v.is_empty())
    }
}

/// Metadata snapshot fetched once per URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub webpage_url: String,
    pub streams: Vec<StreamDescriptor>,
}

impl MediaInfo {
    /// `HH:MM:SS` for media of an hour or more, `MM:SS` otherwise
    pub fn duration_label(&self) -> String {
        let secs = self.duration_seconds % 60;
        let total_mins = self.duration_seconds / 60;
        let hours = total_mins / 60;
        let mins = total_mins % 60;
        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, mins, secs)
        } else {
            format!("{:02}:{:02}", mins, secs)
        }
    }
}

/// A playable (height, container) pair derived from the stream list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOption {
    pub height: u32,
    pub container: String,
    /// Rounded megabytes, `None` when the engine reported no size
    pub size_mb: Option<u64>,
}

impl fmt::Display for StreamOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size_mb {
            Some(mb) => write!(f, "{}p ({} MB) [{}]", self.height, mb, self.container),
            None => write!(f, "{}p (?? MB) [{}]", self.height, self.container),
        }
    }
}

/// Download mode chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Video and audio merged into one file
    #[default]
    Merge,
    VideoOnly,
    AudioOnly,
    /// Video and audio as two independent files
    SeparateStreams,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::VideoOnly => write!(f, "video"),
            Self::AudioOnly => write!(f, "audio"),
            Self::SeparateStreams => write!(f, "separate"),
        }
    }
}

impl FromStr for DownloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" | "normal" => Ok(Self::Merge),
            "video" | "video-only" | "video_only" => Ok(Self::VideoOnly),
            "audio" | "audio-only" | "audio_only" => Ok(Self::AudioOnly),
            "separate" | "separate-streams" | "separate_streams" => Ok(Self::SeparateStreams),
            other => Err(format!("unknown download mode: {}", other)),
        }
    }
}

/// Subtitle language selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubtitleLanguage {
    /// Engine default auto-detection
    #[default]
    Auto,
    /// Restrict to one ISO language code
    Code(String),
    /// Every available track
    All,
}

impl SubtitleLanguage {
    /// Language list handed to the engine; `None` leaves the engine default
    pub fn engine_langs(&self) -> Option<Vec<String>> {
        match self {
            Self::Auto => None,
            Self::Code(code) => Some(vec![code.clone()]),
            Self::All => Some(vec!["all".to_string()]),
        }
    }
}

impl fmt::Display for SubtitleLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Code(code) => write!(f, "{}", code),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for SubtitleLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "auto" | "automatic" => Ok(Self::Auto),
            "all" => Ok(Self::All),
            _ => {
                // Case is kept: the engine matches script/region tags like zh-Hans exactly
                let valid = (2..=8).contains(&trimmed.len())
                    && trimmed.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
                if valid {
                    Ok(Self::Code(trimmed.to_string()))
                } else {
                    Err(format!("invalid subtitle language: {}", s))
                }
            }
        }
    }
}

impl TryFrom<String> for SubtitleLanguage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubtitleLanguage> for String {
    fn from(value: SubtitleLanguage) -> Self {
        value.to_string()
    }
}

/// Offset into the media, parsed from `HH:MM:SS`, `MM:SS` or seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp(time::Duration);

impl Timestamp {
    pub const ZERO: Self = Self(time::Duration::ZERO);

    /// `None` for negative, non-finite or out-of-range input
    pub fn from_seconds(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        time::Duration::checked_seconds_f64(secs).map(Self)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0.as_seconds_f64()
    }

    /// Render as `HH:MM:SS[.mmm]` for ffmpeg; hours may exceed 23
    pub fn to_ffmpeg(&self) -> String {
        let total_ms = self.0.whole_milliseconds().max(0) as u128;
        let ms = total_ms % 1000;
        let total_secs = total_ms / 1000;
        let base = format!(
            "{:02}:{:02}:{:02}",
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60
        );
        if ms > 0 {
            format!("{}.{:03}", base, ms)
        } else {
            base
        }
    }
}

impl FromStr for Timestamp {
    type Err = DownloadError;

    /// `SS[.fff]`, `MM:SS[.fff]` or `HH:MM:SS[.fff]`; the leading field is not
    /// capped, so `90:00` is ninety minutes and `25:00:00` is a day and an hour
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || DownloadError::InvalidInput(format!("invalid timestamp: {:?}", s));

        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid());
        }

        let (seconds_part, whole_parts) = parts.split_last().ok_or_else(invalid)?;
        let seconds: f64 = seconds_part.trim().parse().map_err(|_| invalid())?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(invalid());
        }
        // Below the leading field, minutes and seconds stay under 60
        if !whole_parts.is_empty() && seconds >= 60.0 {
            return Err(invalid());
        }

        let mut total = seconds;
        for (i, part) in whole_parts.iter().rev().enumerate() {
            let value: u64 = part.trim().parse().map_err(|_| invalid())?;
            let is_leading = i + 1 == whole_parts.len();
            if !is_leading && value >= 60 {
                return Err(invalid());
            }
            total += value as f64 * 60f64.powi(i as i32 + 1);
        }

        Self::from_seconds(total).ok_or_else(invalid)
    }
}

/// Time range to cut from the finished file
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipRange {
    /// Defaults to zero when absent
    pub start: Option<Timestamp>,
    /// Open-ended when absent
    pub end: Option<Timestamp>,
}

impl ClipRange {
    /// Build from the raw start/end fields; empty strings mean "unset"
    pub fn parse(start: &str, end: &str) -> Result<Self, DownloadError> {
        let start = match start.trim() {
            "" => None,
            s => Some(s.parse::<Timestamp>()?),
        };
        let end = match end.trim() {
            "" => None,
            s => Some(s.parse::<Timestamp>()?),
        };
        if let (Some(s), Some(e)) = (start, end) {
            if e.as_seconds() <= s.as_seconds() {
                return Err(DownloadError::InvalidInput(format!(
                    "clip end {} is not after start {}",
                    e.to_ffmpeg(),
                    s.to_ffmpeg()
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn start_or_zero(&self) -> Timestamp {
        self.start.unwrap_or(Timestamp::ZERO)
    }
}

/// Everything one download request needs, fixed for the duration of the job
#[derive(Debug, Clone)]
pub struct DownloadIntent {
    pub url: String,
    pub destination: PathBuf,
    /// Desired container ("mp3" selects audio extraction in merge mode)
    pub container: String,
    /// Quality descriptor as displayed, e.g. `720p (45 MB) [mp4]` or `best`
    pub quality: String,
    pub mode: DownloadMode,
    pub playlist: bool,
    /// `Some` when subtitles were requested
    pub subtitles: Option<SubtitleLanguage>,
    /// `Some` when a clip was requested
    pub clip: Option<ClipRange>,
}

impl DownloadIntent {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            container: STREAMING_CONTAINER.to_string(),
            quality: "best".to_string(),
            mode: DownloadMode::Merge,
            playlist: false,
            subtitles: None,
            clip: None,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into().trim().to_lowercase();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_mode(mut self, mode: DownloadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_playlist(mut self, playlist: bool) -> Self {
        self.playlist = playlist;
        self
    }

    pub fn with_subtitles(mut self, subtitles: Option<SubtitleLanguage>) -> Self {
        self.subtitles = subtitles;
        self
    }

    pub fn with_clip(mut self, clip: Option<ClipRange>) -> Self {
        self.clip = clip;
        self
    }

    /// Reject requests that would fail before reaching the engine
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::InvalidInput("URL is empty".to_string()));
        }
        if !self.destination.is_dir() {
            return Err(DownloadError::InvalidInput(format!(
                "destination is not a directory: {}",
                self.destination.display()
            )));
        }
        if self.container.trim().is_empty() || self.quality.trim().is_empty() {
            return Err(DownloadError::InvalidInput(
                "container and quality must be selected".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal value of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    /// Resolved output for display; two paths joined by `PATH_SEPARATOR` for
    /// separate streams, empty when nothing was produced
    pub output: String,
    pub title: String,
    /// Every produced file, in output order
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

impl JobResult {
    pub fn completed(output: Option<PathBuf>, title: String) -> Self {
        Self {
            success: true,
            message: "Download completed".to_string(),
            output: output.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            title,
            outputs: output.into_iter().collect(),
        }
    }

    /// Separate-streams result; either half may be missing
    pub fn completed_pair(video: Option<PathBuf>, audio: Option<PathBuf>, title: String) -> Self {
        Self {
            output: join_output_paths(video.as_deref(), audio.as_deref()),
            outputs: video.into_iter().chain(audio).collect(),
            ..Self::completed(None, title)
        }
    }

    pub fn failed(error: &DownloadError) -> Self {
        Self {
            success: false,
            message: format!("Error: {}", error),
            output: String::new(),
            title: String::new(),
            outputs: Vec::new(),
        }
    }

    /// Produced files; never derived from the display string, so names
    /// containing the separator survive
    pub fn output_paths(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn has_output(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Join two optional paths the way separate-streams results are reported
pub fn join_output_paths(video: Option<&Path>, audio: Option<&Path>) -> String {
    let show = |p: Option<&Path>| p.map(|p| p.display().to_string()).unwrap_or_default();
    format!("{}{}{}", show(video), PATH_SEPARATOR, show(audio))
}

/// Pipeline stage announced on the progress channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStage {
    Extracting { step: usize, total: usize, label: String },
    Remuxing(PathBuf),
    Clipping(PathBuf),
}

/// Uniform progress signal consumed by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Percent complete of the current extraction step, 0..=100
    Percent(u8),
    /// Bytes per second and seconds remaining, 0 when unknown
    Transfer { speed: f64, eta: u64 },
    Stage(JobStage),
}
