// Application controller
//
// Owns settings and history and is the only place they change. Metadata
// fetches run on their own task under a deadline; downloads run on their own
// task and report through a progress channel. History is updated after a
// job's terminal result, before the next job starts.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::downloader::batch::{BatchOutcome, BatchSequencer};
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::{FormatSelector, ResolvedFormats};
use crate::downloader::models::{DownloadIntent, JobResult, MediaInfo, ProgressEvent};
use crate::downloader::orchestrator::Downloader;
use crate::downloader::progress::ProgressSink;
use crate::settings::{History, Settings, SettingsStore};

/// Deadline for a metadata fetch
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress channel capacity per job
const PROGRESS_CAPACITY: usize = 256;

/// Metadata plus the selections offered for it
#[derive(Debug, Clone)]
pub struct FetchedInfo {
    pub info: MediaInfo,
    pub formats: ResolvedFormats,
    /// Pre-selected quality label
    pub quality: String,
    /// Pre-selected container
    pub container: String,
}

/// A running download
pub struct DownloadHandle {
    pub progress: mpsc::Receiver<ProgressEvent>,
    pub join: JoinHandle<JobResult>,
}

impl DownloadHandle {
    /// Wait for the terminal result; a task that died reports as cancelled.
    /// Undrained progress is discarded so a full channel cannot stall the job.
    pub async fn wait(self) -> JobResult {
        let DownloadHandle { progress, join } = self;
        drop(progress);
        match join.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("[job] download task ended abnormally: {}", e);
                JobResult::failed(&DownloadError::Cancelled)
            }
        }
    }
}

pub struct App {
    store: SettingsStore,
    settings: Settings,
    history: History,
    downloader: Downloader,
    fetch_timeout: Duration,
}

impl App {
    /// Load settings and history from `store`
    pub fn new(store: SettingsStore, downloader: Downloader) -> Result<Self, DownloadError> {
        let settings = store.load_settings()?;
        let history = History::load(store.clone());
        log::debug!("[app] config dir {}", store.dir().display());

        Ok(Self {
            store,
            settings,
            history,
            downloader,
            fetch_timeout: FETCH_TIMEOUT,
        })
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Change one setting and persist it
    pub fn update_setting(&mut self, key: &str, value: &str) -> Result<(), DownloadError> {
        self.settings.set(key, value)?;
        self.store.save_settings(&self.settings)
    }

    pub fn clear_history(&mut self) -> Result<(), DownloadError> {
        self.history.clear()
    }

    /// Fetch metadata under the deadline; on expiry the fetch task is aborted,
    /// which kills the engine process
    pub async fn fetch_info(&self, url: &str) -> Result<FetchedInfo, DownloadError> {
        let downloader = self.downloader.clone();
        let owned_url = url.to_string();
        let mut task = tokio::spawn(async move { downloader.fetch_info(&owned_url).await });

        let info = match tokio::time::timeout(self.fetch_timeout, &mut task).await {
            Ok(joined) => joined.map_err(|e| DownloadError::ExecutionError(format!("fetch task failed: {}", e)))??,
            Err(_) => {
                task.abort();
                log::warn!("[extract] metadata fetch for {} timed out", url);
                return Err(DownloadError::Timeout(self.fetch_timeout.as_secs()));
            }
        };

        let formats = FormatSelector::resolve(&info.streams);
        let quality = formats.preferred_quality(&self.settings.default_quality);
        let container = formats.preferred_container(&self.settings.default_format);
        log::info!(
            "[format] {}: {} qualities, {} containers",
            info.title,
            formats.qualities.len(),
            formats.containers.len()
        );

        Ok(FetchedInfo { info, formats, quality, container })
    }

    /// Intent for `url` seeded from the stored defaults
    pub fn default_intent(&self, url: &str) -> DownloadIntent {
        DownloadIntent::new(url.trim(), self.settings.default_download_path.clone())
            .with_container(self.settings.default_format.clone())
            .with_quality(self.settings.default_quality.clone())
    }

    /// Start a job on its own task
    pub fn start_download(&self, intent: DownloadIntent) -> DownloadHandle {
        let (sink, progress) = ProgressSink::channel(PROGRESS_CAPACITY);
        let downloader = self.downloader.clone();
        let join = tokio::spawn(async move { downloader.run_job(&intent, &sink).await });
        DownloadHandle { progress, join }
    }

    /// Apply a job's terminal result to history
    pub fn finish_job(&mut self, result: &JobResult) -> Result<(), DownloadError> {
        if result.success && result.has_output() {
            self.history.add_result(result)?;
        }
        Ok(())
    }

    /// Run every line of `text` as a job built from `template`, recording each
    /// result before the next job starts
    pub async fn run_batch(
        &mut self,
        text: &str,
        template: DownloadIntent,
        progress: &ProgressSink,
    ) -> Vec<BatchOutcome> {
        let mut batch = BatchSequencer::from_text(text, template);
        let downloader = self.downloader.clone();
        let history = &mut self.history;

        batch
            .run(&downloader, progress, |outcome| {
                if outcome.result.success && outcome.result.has_output() {
                    if let Err(e) = history.add_result(&outcome.result) {
                        log::warn!("[history] could not record {}: {}", outcome.url, e);
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::extractors::{ExtractedMedia, MediaEngine};
    use crate::downloader::models::StreamDescriptor;
    use crate::downloader::orchestrator::tests::{FakeEngine, FakeTranscoder};
    use crate::downloader::plan::ExtractionStep;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;

    struct SlowEngine;

    #[async_trait]
    impl MediaEngine for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn fetch_info(&self, _url: &str) -> Result<MediaInfo, DownloadError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(MediaInfo::default())
        }

        async fn extract(
            &self,
            _url: &str,
            _step: &ExtractionStep,
            _destination: &Path,
            _progress: &ProgressSink,
        ) -> Result<ExtractedMedia, DownloadError> {
            Err(DownloadError::Cancelled)
        }
    }

    struct StreamsEngine;

    #[async_trait]
    impl MediaEngine for StreamsEngine {
        fn name(&self) -> &'static str {
            "streams"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn fetch_info(&self, _url: &str) -> Result<MediaInfo, DownloadError> {
            let stream = |height: u32| StreamDescriptor {
                format_id: height.to_string(),
                ext: "mp4".into(),
                height: Some(height),
                vcodec: Some("avc1".into()),
                ..Default::default()
            };
            Ok(MediaInfo {
                title: "Demo".into(),
                streams: vec![stream(720), stream(1080)],
                ..Default::default()
            })
        }

        async fn extract(
            &self,
            _url: &str,
            _step: &ExtractionStep,
            _destination: &Path,
            _progress: &ProgressSink,
        ) -> Result<ExtractedMedia, DownloadError> {
            Err(DownloadError::Cancelled)
        }
    }

    /// Emits far more progress than the channel holds, then produces a file
    struct ChattyEngine;

    #[async_trait]
    impl MediaEngine for ChattyEngine {
        fn name(&self) -> &'static str {
            "chatty"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn fetch_info(&self, _url: &str) -> Result<MediaInfo, DownloadError> {
            Ok(MediaInfo::default())
        }

        async fn extract(
            &self,
            _url: &str,
            step: &ExtractionStep,
            destination: &Path,
            progress: &ProgressSink,
        ) -> Result<ExtractedMedia, DownloadError> {
            for i in 0..(PROGRESS_CAPACITY * 4) {
                progress.emit(ProgressEvent::Percent((i % 100) as u8)).await;
            }
            std::fs::write(destination.join(step.file_name("Chatty", step.candidates[0])), b"x")?;
            Ok(ExtractedMedia { title: "Chatty".into(), files: Vec::new() })
        }
    }

    fn app_with(dir: &Path, engine: Arc<dyn MediaEngine>) -> App {
        let downloader = Downloader::new(engine, Arc::new(FakeTranscoder::default()));
        App::new(SettingsStore::new(dir.join("cfg")), downloader).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_preselects_stored_default() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Arc::new(StreamsEngine));

        let fetched = app.fetch_info("https://e/v").await.unwrap();
        assert_eq!(fetched.info.title, "Demo");
        assert_eq!(fetched.quality, "1080p (?? MB) [mp4]");
        assert_eq!(fetched.container, "mp4");
        assert_eq!(fetched.formats.containers, vec!["mp3", "mp4"]);
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Arc::new(SlowEngine)).with_fetch_timeout(Duration::from_millis(50));

        let err = app.fetch_info("https://e/slow").await.unwrap_err();
        assert!(matches!(err, DownloadError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_error_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Arc::new(FakeEngine::new("x").failing("https://bad")));

        let err = app.fetch_info("https://bad").await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_download_updates_history_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with(dir.path(), Arc::new(FakeEngine::new("Song")));

        let intent = DownloadIntent::new("https://e/1", dir.path()).with_container("mp3");
        let mut handle = app.start_download(intent);
        let mut saw_complete = false;
        while let Some(ev) = handle.progress.recv().await {
            if ev == ProgressEvent::Percent(100) {
                saw_complete = true;
            }
        }
        let result = handle.wait().await;
        assert!(saw_complete);
        assert!(result.success);

        app.finish_job(&result).unwrap();
        assert_eq!(app.history().entries(), &[result.output.clone()]);
    }

    #[tokio::test]
    async fn test_wait_without_draining_progress() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Arc::new(ChattyEngine));

        let intent = DownloadIntent::new("https://e/loud", dir.path()).with_container("mp3");
        let result = tokio::time::timeout(Duration::from_secs(5), app.start_download(intent).wait())
            .await
            .expect("job stalled on a full progress channel");
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_history_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with(dir.path(), Arc::new(FakeEngine::new("x").failing("https://bad")));

        let result = app.start_download(DownloadIntent::new("https://bad", dir.path())).wait().await;
        assert!(!result.success);
        app.finish_job(&result).unwrap();
        assert!(app.history().entries().is_empty());
    }

    #[tokio::test]
    async fn test_batch_records_each_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with(dir.path(), Arc::new(FakeEngine::new("Same").failing("https://2")));

        let template = DownloadIntent::new("", dir.path()).with_container("mp3");
        let outcomes = app
            .run_batch("https://1\nhttps://2\n\nhttps://3\n", template, &ProgressSink::disabled())
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[1].result.success);
        // Same title twice: the path is recorded once per successful job
        assert_eq!(app.history().entries().len(), 2);
    }

    #[test]
    fn test_update_setting_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with(dir.path(), Arc::new(FakeEngine::new("x")));
        app.update_setting("default_format", "WEBM").unwrap();

        let reloaded = SettingsStore::new(dir.path().join("cfg")).load_settings().unwrap();
        assert_eq!(reloaded.default_format, "webm");
        assert_eq!(app.default_intent(" https://e ").container, "webm");
    }
}
