// Job plan builder - maps a DownloadIntent to extraction + post-processing steps
//
// All video selections insist on H.264 (avc1) in mp4 with m4a audio so the
// result plays everywhere; the merge selection falls back to any mp4.

use std::path::{Path, PathBuf};

use super::format_selector::QualitySelection;
use super::models::{ClipRange, DownloadIntent, DownloadMode, SubtitleLanguage, AUDIO_CONTAINER};

/// Audio selection when the engine transcodes to mp3 anyway
const AUDIO_ANY_FORMAT: &str = "bestaudio/best";

/// Audio selection preferring m4a
const AUDIO_ONLY_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio/best";

const MERGE_CANDIDATES: &[&str] = &["mp3", "mp4", "webm", "mkv"];
const VIDEO_CANDIDATES: &[&str] = &["mp4", "webm", "mkv"];
const AUDIO_CANDIDATES: &[&str] = &["mp3"];
const SEPARATE_AUDIO_CANDIDATES: &[&str] = &["mp3", "m4a", "webm"];

/// Video + audio merged, exact height when known, any mp4 as fallback
pub fn merged_video_format(height: Option<u32>) -> String {
    match height {
        Some(h) => format!("bestvideo[ext=mp4][vcodec^=avc1][height={}]+bestaudio[ext=m4a]/best[ext=mp4]", h),
        None => "bestvideo[ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/best[ext=mp4]".to_string(),
    }
}

/// Video stream alone, no audio merge
pub fn video_only_format(height: Option<u32>) -> String {
    match height {
        Some(h) => format!("bestvideo[ext=mp4][vcodec^=avc1][height={}]", h),
        None => "bestvideo[ext=mp4][vcodec^=avc1]".to_string(),
    }
}

/// Post-processing the engine performs itself as part of the extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineProcessor {
    /// Extract and transcode audio (`-x --audio-format`)
    ExtractAudio { codec: &'static str, quality: &'static str },
    /// Convert the merged video to a container
    ConvertVideo { container: &'static str },
}

impl EngineProcessor {
    fn mp3() -> Self {
        Self::ExtractAudio { codec: AUDIO_CONTAINER, quality: "192" }
    }
}

/// One call into the extraction engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionStep {
    /// Short name for logs and stage events
    pub label: &'static str,
    /// Engine format-selection expression
    pub format: String,
    /// Appended to the title in the output name ("", "_video", "_audio")
    pub suffix: &'static str,
    /// Extensions probed after the call, in priority order
    pub candidates: Vec<&'static str>,
    pub processors: Vec<EngineProcessor>,
    pub subtitles: Option<SubtitleLanguage>,
    pub playlist: bool,
}

impl ExtractionStep {
    /// Engine output template; the engine fills in title and extension
    pub fn template(&self) -> String {
        format!("%(title)s{}.%(ext)s", self.suffix)
    }

    /// Full output template inside `destination`
    pub fn template_in(&self, destination: &Path) -> PathBuf {
        destination.join(self.template())
    }

    /// File name the engine produces for `title` with `ext`
    pub fn file_name(&self, title: &str, ext: &str) -> String {
        format!("{}{}.{}", title, self.suffix, ext)
    }
}

/// Step run on the resolved output after extraction
#[derive(Debug, Clone, PartialEq)]
pub enum PostProcessStep {
    /// Fast-start remux of the output of extraction `step`
    Remux { step: usize },
    /// Stream-copy trim of the job's final output
    Clip(ClipRange),
}

/// How the extraction outputs combine into the job's result path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Single,
    /// Video and audio reported side by side
    Pair,
}

/// Deterministic plan for one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub extractions: Vec<ExtractionStep>,
    pub post_process: Vec<PostProcessStep>,
    pub output: OutputShape,
    /// Extension whose newest file gets its timestamps refreshed
    pub touch_extension: String,
}

impl JobPlan {
    pub fn remux_targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.post_process.iter().filter_map(|p| match p {
            PostProcessStep::Remux { step } => Some(*step),
            PostProcessStep::Clip(_) => None,
        })
    }

    pub fn clip(&self) -> Option<ClipRange> {
        self.post_process.iter().find_map(|p| match p {
            PostProcessStep::Clip(range) => Some(*range),
            PostProcessStep::Remux { .. } => None,
        })
    }
}

pub struct PlanBuilder;

impl PlanBuilder {
    pub fn build(intent: &DownloadIntent) -> JobPlan {
        let selection = QualitySelection::parse(&intent.quality);
        let height = selection.height;

        let step = |label: &'static str, format: String, suffix: &'static str, candidates: &[&'static str], processors: Vec<EngineProcessor>| ExtractionStep {
            label,
            format,
            suffix,
            candidates: candidates.to_vec(),
            processors,
            subtitles: intent.subtitles.clone(),
            playlist: intent.playlist,
        };

        let video_ext = selection
            .container
            .clone()
            .unwrap_or_else(|| intent.container.clone());

        let (extractions, mut post_process, output, touch_extension) = match intent.mode {
            DownloadMode::Merge if intent.container == AUDIO_CONTAINER => (
                vec![step("audio", AUDIO_ANY_FORMAT.to_string(), "", MERGE_CANDIDATES, vec![EngineProcessor::mp3()])],
                vec![],
                OutputShape::Single,
                AUDIO_CONTAINER.to_string(),
            ),
            DownloadMode::Merge => (
                vec![step(
                    "media",
                    merged_video_format(height),
                    "",
                    MERGE_CANDIDATES,
                    vec![EngineProcessor::ConvertVideo { container: "mp4" }],
                )],
                vec![PostProcessStep::Remux { step: 0 }],
                OutputShape::Single,
                video_ext,
            ),
            DownloadMode::VideoOnly => (
                vec![step("video", video_only_format(height), "", VIDEO_CANDIDATES, vec![])],
                vec![PostProcessStep::Remux { step: 0 }],
                OutputShape::Single,
                video_ext,
            ),
            DownloadMode::AudioOnly => (
                vec![step("audio", AUDIO_ONLY_FORMAT.to_string(), "", AUDIO_CANDIDATES, vec![EngineProcessor::mp3()])],
                vec![],
                OutputShape::Single,
                AUDIO_CONTAINER.to_string(),
            ),
            DownloadMode::SeparateStreams => (
                vec![
                    step("video", video_only_format(height), "_video", VIDEO_CANDIDATES, vec![]),
                    step("audio", AUDIO_ONLY_FORMAT.to_string(), "_audio", SEPARATE_AUDIO_CANDIDATES, vec![]),
                ],
                vec![PostProcessStep::Remux { step: 0 }],
                OutputShape::Pair,
                video_ext,
            ),
        };

        if let Some(range) = intent.clip {
            post_process.push(PostProcessStep::Clip(range));
        }

        JobPlan {
            extractions,
            post_process,
            output,
            touch_extension,
        }
    }
}
