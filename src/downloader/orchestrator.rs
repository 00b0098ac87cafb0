// Orchestrator - runs one job plan end to end
//
// Extraction failures abort the job with a failed JobResult. Remux and clip
// failures are logged and the job completes with the best file available.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::errors::DownloadError;
use super::extractors::MediaEngine;
use super::models::{DownloadIntent, JobResult, JobStage, MediaInfo, ProgressEvent};
use super::plan::{JobPlan, OutputShape, PlanBuilder};
use super::postprocess::{self, Transcoder};
use super::progress::ProgressSink;
use super::utils::{resolve_output, touch_newest};

/// Title reported when the engine did not announce one
const FALLBACK_TITLE: &str = "Downloaded";

#[derive(Clone)]
pub struct Downloader {
    engine: Arc<dyn MediaEngine>,
    transcoder: Arc<dyn Transcoder>,
}

impl Downloader {
    pub fn new(engine: Arc<dyn MediaEngine>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { engine, transcoder }
    }

    pub fn engine(&self) -> &dyn MediaEngine {
        self.engine.as_ref()
    }

    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        if url.trim().is_empty() {
            return Err(DownloadError::InvalidInput("URL is empty".to_string()));
        }
        log::info!("[extract] fetching info with {}", self.engine.name());
        self.engine.fetch_info(url.trim()).await
    }

    /// Run one job; never fails, the outcome is carried by the JobResult
    pub async fn run_job(&self, intent: &DownloadIntent, progress: &ProgressSink) -> JobResult {
        match self.execute(intent, progress).await {
            Ok(result) => {
                log::info!("[job] {} -> {:?}", intent.url, result.output);
                result
            }
            Err(e) => {
                log::error!("[job] {} failed: {}", intent.url, e);
                JobResult::failed(&e)
            }
        }
    }

    async fn execute(&self, intent: &DownloadIntent, progress: &ProgressSink) -> Result<JobResult, DownloadError> {
        intent.validate()?;
        let plan = PlanBuilder::build(intent);
        log::debug!("[job] plan for {}: {:?}", intent.url, plan);

        let (outputs, title) = self.extract_all(intent, &plan, progress).await?;

        touch_newest(&intent.destination, &plan.touch_extension);

        let result = match plan.output {
            OutputShape::Single => {
                let mut output = outputs.into_iter().next().flatten();
                if let Some(range) = plan.clip() {
                    match output.clone().filter(|p| p.is_file()) {
                        Some(source) => {
                            progress.emit(ProgressEvent::Stage(JobStage::Clipping(source.clone()))).await;
                            match postprocess::clip(self.transcoder.as_ref(), &source, &range).await {
                                Ok(clipped) => output = Some(clipped),
                                Err(e) => log::warn!("[clip] {} kept unclipped: {}", source.display(), e),
                            }
                        }
                        None => log::debug!("[clip] no output file to clip"),
                    }
                }
                JobResult::completed(output, title)
            }
            OutputShape::Pair => {
                if plan.clip().is_some() {
                    log::debug!("[clip] skipped for separate streams");
                }
                let mut paths = outputs.into_iter();
                JobResult::completed_pair(paths.next().flatten(), paths.next().flatten(), title)
            }
        };

        Ok(result)
    }

    /// Run every extraction in order; each remux target is rewritten right
    /// after its own extraction
    async fn extract_all(
        &self,
        intent: &DownloadIntent,
        plan: &JobPlan,
        progress: &ProgressSink,
    ) -> Result<(Vec<Option<PathBuf>>, String), DownloadError> {
        let total = plan.extractions.len();
        let remux: Vec<usize> = plan.remux_targets().collect();
        let mut outputs = Vec::with_capacity(total);
        let mut title = String::new();

        for (index, step) in plan.extractions.iter().enumerate() {
            progress
                .emit(ProgressEvent::Stage(JobStage::Extracting {
                    step: index + 1,
                    total,
                    label: step.label.to_string(),
                }))
                .await;

            let media = self
                .engine
                .extract(&intent.url, step, &intent.destination, progress)
                .await?;

            let stem = media.name_stem(step.suffix);
            let resolved = resolve_output(&intent.destination, step, &stem);
            match &resolved {
                Some(path) => log::info!("[extract] {} resolved to {}", step.label, path.display()),
                None => log::warn!(
                    "[extract] no {}{}.{{{}}} in {}",
                    stem,
                    step.suffix,
                    step.candidates.join(","),
                    intent.destination.display()
                ),
            }

            if remux.contains(&index) {
                if let Some(path) = &resolved {
                    self.remux(path, progress).await;
                }
            }

            if title.is_empty() {
                title = media.title;
            }
            outputs.push(resolved);
        }

        if title.is_empty() {
            title = FALLBACK_TITLE.to_string();
        }
        Ok((outputs, title))
    }

    async fn remux(&self, path: &Path, progress: &ProgressSink) {
        progress
            .emit(ProgressEvent::Stage(JobStage::Remuxing(path.to_path_buf())))
            .await;
        if let Err(e) = postprocess::remux_faststart(self.transcoder.as_ref(), path).await {
            log::warn!("[remux] {} left as downloaded: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::downloader::extractors::ExtractedMedia;
    use crate::downloader::models::{ClipRange, DownloadMode, PATH_SEPARATOR};
    use crate::downloader::plan::ExtractionStep;
    use crate::downloader::postprocess::{TranscodeJob, TranscodeOp};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    /// Writes `<title><suffix>.<ext>` for each step, or fails for listed URLs
    pub(crate) struct FakeEngine {
        pub title: String,
        pub ext_for: fn(&ExtractionStep) -> &'static str,
        pub failing_urls: Vec<String>,
        pub calls: Mutex<Vec<(String, &'static str)>>,
    }

    impl FakeEngine {
        pub(crate) fn new(title: &str) -> Self {
            Self {
                title: title.to_string(),
                ext_for: |step| step.candidates[0],
                failing_urls: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(mut self, url: &str) -> Self {
            self.failing_urls.push(url.to_string());
            self
        }
    }

    #[async_trait]
    impl MediaEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn fetch_info(&self, url: &str) -> Result<MediaInfo, DownloadError> {
            if self.failing_urls.iter().any(|u| u == url) {
                return Err(DownloadError::from("ERROR: Unsupported URL: ".to_string() + url));
            }
            Ok(MediaInfo { title: self.title.clone(), ..Default::default() })
        }

        async fn extract(
            &self,
            url: &str,
            step: &ExtractionStep,
            destination: &Path,
            progress: &ProgressSink,
        ) -> Result<ExtractedMedia, DownloadError> {
            self.calls.lock().unwrap().push((url.to_string(), step.label));
            if self.failing_urls.iter().any(|u| u == url) {
                return Err(DownloadError::from("ERROR: Video unavailable".to_string()));
            }
            progress.emit(ProgressEvent::Percent(100)).await;
            let ext = (self.ext_for)(step);
            fs::write(destination.join(step.file_name(&self.title, ext)), b"media").unwrap();
            Ok(ExtractedMedia { title: self.title.clone(), files: Vec::new() })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeTranscoder {
        pub fail_clip: bool,
        pub fail_remux: bool,
        pub jobs: Mutex<Vec<TranscodeJob>>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn run(&self, job: &TranscodeJob) -> Result<(), DownloadError> {
            self.jobs.lock().unwrap().push(job.clone());
            let fail = match job.op {
                TranscodeOp::Faststart => self.fail_remux,
                TranscodeOp::Clip(_) => self.fail_clip,
            };
            if fail {
                return Err(DownloadError::TranscodeFailed { path: job.input.clone(), message: "boom".into() });
            }
            fs::write(&job.output, b"processed").unwrap();
            Ok(())
        }
    }

    fn downloader(engine: FakeEngine, transcoder: FakeTranscoder) -> (Downloader, Arc<FakeEngine>, Arc<FakeTranscoder>) {
        let engine = Arc::new(engine);
        let transcoder = Arc::new(transcoder);
        (Downloader::new(engine.clone(), transcoder.clone()), engine, transcoder)
    }

    #[tokio::test]
    async fn test_merge_job_remuxes_and_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let (dl, _, transcoder) = downloader(FakeEngine::new("Clip"), FakeTranscoder::default());
        let mut engine_ext = FakeEngine::new("Clip");
        engine_ext.ext_for = |_| "mp4";
        let (dl_mp4, _, transcoder_mp4) = downloader(engine_ext, FakeTranscoder::default());

        // First candidate for merge is mp3: no remux
        let intent = DownloadIntent::new("https://e/1", dir.path());
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;
        assert!(result.success);
        assert_eq!(result.output, dir.path().join("Clip.mp3").display().to_string());
        assert!(transcoder.jobs.lock().unwrap().is_empty());

        let other = tempfile::tempdir().unwrap();
        let intent = DownloadIntent::new("https://e/1", other.path());
        let result = dl_mp4.run_job(&intent, &ProgressSink::disabled()).await;
        assert_eq!(result.output, other.path().join("Clip.mp4").display().to_string());
        assert_eq!(result.title, "Clip");
        assert_eq!(result.message, "Download completed");
        assert_eq!(fs::read(other.path().join("Clip.mp4")).unwrap(), b"processed");
        assert_eq!(transcoder_mp4.jobs.lock().unwrap()[0].op, TranscodeOp::Faststart);
    }

    #[tokio::test]
    async fn test_separate_streams_pair_and_sequential_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FakeEngine::new("Song");
        engine.ext_for = |step| if step.suffix == "_video" { "mp4" } else { "m4a" };
        let (dl, engine, transcoder) = downloader(engine, FakeTranscoder::default());

        let clip = ClipRange::parse("5", "").unwrap();
        let intent = DownloadIntent::new("https://e/2", dir.path())
            .with_mode(DownloadMode::SeparateStreams)
            .with_clip(Some(clip));
        let (sink, mut rx) = ProgressSink::channel(64);
        let result = dl.run_job(&intent, &sink).await;
        drop(sink);

        let video = dir.path().join("Song_video.mp4");
        let audio = dir.path().join("Song_audio.m4a");
        assert_eq!(
            result.output,
            format!("{}{}{}", video.display(), PATH_SEPARATOR, audio.display())
        );
        assert_eq!(result.output_paths(), &[video.clone(), audio]);

        let labels: Vec<_> = engine.calls.lock().unwrap().iter().map(|c| c.1).collect();
        assert_eq!(labels, vec!["video", "audio"]);

        // Remux only on the video leg; clip skipped for a pair
        let jobs = transcoder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].input, video);

        let mut stages = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let ProgressEvent::Stage(stage) = ev {
                stages.push(stage);
            }
        }
        assert_eq!(
            stages[0],
            JobStage::Extracting { step: 1, total: 2, label: "video".into() }
        );
        assert_eq!(stages[1], JobStage::Remuxing(video));
        assert!(matches!(stages[2], JobStage::Extracting { step: 2, .. }));
    }

    #[tokio::test]
    async fn test_title_with_separator_is_one_output() {
        let dir = tempfile::tempdir().unwrap();
        let (dl, _, _) = downloader(FakeEngine::new("Song; Remix"), FakeTranscoder::default());

        let intent = DownloadIntent::new("https://e/semi", dir.path()).with_mode(DownloadMode::AudioOnly);
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;

        let expected = dir.path().join("Song; Remix.mp3");
        assert!(expected.is_file());
        assert_eq!(result.output_paths(), &[expected]);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let (dl, _, transcoder) = downloader(FakeEngine::new("x").failing("https://bad"), FakeTranscoder::default());

        let result = dl
            .run_job(&DownloadIntent::new("https://bad", dir.path()), &ProgressSink::disabled())
            .await;
        assert!(!result.success);
        assert!(result.message.contains("Video unavailable"));
        assert!(result.output.is_empty());
        assert!(transcoder.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postprocess_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FakeEngine::new("Talk");
        engine.ext_for = |_| "mp4";
        let transcoder = FakeTranscoder { fail_clip: true, fail_remux: true, ..Default::default() };
        let (dl, _, _) = downloader(engine, transcoder);

        let intent = DownloadIntent::new("https://e/3", dir.path())
            .with_mode(DownloadMode::VideoOnly)
            .with_clip(Some(ClipRange::parse("0:10", "0:20").unwrap()));
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;

        assert!(result.success);
        assert_eq!(result.output, dir.path().join("Talk.mp4").display().to_string());
        assert_eq!(fs::read(dir.path().join("Talk.mp4")).unwrap(), b"media");
    }

    #[tokio::test]
    async fn test_clip_becomes_final_output() {
        let dir = tempfile::tempdir().unwrap();
        let (dl, _, transcoder) = downloader(FakeEngine::new("Tune"), FakeTranscoder::default());

        let intent = DownloadIntent::new("https://e/4", dir.path())
            .with_mode(DownloadMode::AudioOnly)
            .with_clip(Some(ClipRange::parse("", "30").unwrap()));
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;

        assert_eq!(result.output, dir.path().join("Tune_clip.mp3").display().to_string());
        let jobs = transcoder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0].op, TranscodeOp::Clip(_)));
    }

    #[tokio::test]
    async fn test_unresolved_output_completes_with_empty_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FakeEngine::new("Odd");
        engine.ext_for = |_| "flv";
        let (dl, _, transcoder) = downloader(engine, FakeTranscoder::default());

        let intent = DownloadIntent::new("https://e/5", dir.path()).with_mode(DownloadMode::VideoOnly);
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;

        assert!(result.success);
        assert!(result.output.is_empty());
        assert!(!result.has_output());
        assert!(transcoder.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_intent_never_reaches_engine() {
        let (dl, engine, _) = downloader(FakeEngine::new("x"), FakeTranscoder::default());
        let intent = DownloadIntent::new("https://e/6", "/definitely/not/a/dir");
        let result = dl.run_job(&intent, &ProgressSink::disabled()).await;

        assert!(!result.success);
        assert!(result.message.starts_with("Error: Invalid input"));
        assert!(engine.calls.lock().unwrap().is_empty());
    }
}
