// Downloader module - job planning, engine orchestration, post-processing

pub mod batch;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod plan;
pub mod postprocess;
pub mod progress;
pub mod tools;
pub mod utils;

pub use batch::{BatchOutcome, BatchSequencer};
pub use errors::DownloadError;
pub use extractors::{EngineConfig, MediaEngine, YtDlpEngine};
pub use format_selector::{FormatSelector, ResolvedFormats};
pub use models::{ClipRange, DownloadIntent, DownloadMode, JobResult, MediaInfo, ProgressEvent, SubtitleLanguage};
pub use orchestrator::Downloader;
pub use postprocess::{FfmpegTranscoder, Transcoder};
pub use progress::ProgressSink;
