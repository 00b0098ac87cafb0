// Batch sequencer - FIFO queue of URLs, one job at a time

use std::collections::VecDeque;

use super::models::{DownloadIntent, JobResult};
use super::orchestrator::Downloader;
use super::progress::ProgressSink;

/// One finished batch entry
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub url: String,
    pub result: JobResult,
}

/// Ordered queue of URLs sharing one job template
pub struct BatchSequencer {
    queue: VecDeque<String>,
    template: DownloadIntent,
}

impl BatchSequencer {
    /// `template` supplies everything except the URL
    pub fn new(template: DownloadIntent) -> Self {
        Self {
            queue: VecDeque::new(),
            template,
        }
    }

    /// Queue the non-empty trimmed lines of `text`
    pub fn from_text(text: &str, template: DownloadIntent) -> Self {
        let mut batch = Self::new(template);
        batch.extend(text.lines());
        batch
    }

    pub fn push(&mut self, url: impl AsRef<str>) {
        let url = url.as_ref().trim();
        if !url.is_empty() {
            self.queue.push_back(url.to_string());
        }
    }

    pub fn extend<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.push(url);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop the head and run it to its terminal result
    pub async fn run_next(&mut self, downloader: &Downloader, progress: &ProgressSink) -> Option<BatchOutcome> {
        let url = self.queue.pop_front()?;
        log::info!("[batch] starting {} ({} left)", url, self.queue.len());

        let mut intent = self.template.clone();
        intent.url = url.clone();
        let result = downloader.run_job(&intent, progress).await;

        if !result.success {
            log::warn!("[batch] {} failed, continuing: {}", url, result.message);
        }
        Some(BatchOutcome { url, result })
    }

    /// Drain the queue in order, calling `on_done` after every job
    pub async fn run<F>(&mut self, downloader: &Downloader, progress: &ProgressSink, mut on_done: F) -> Vec<BatchOutcome>
    where
        F: FnMut(&BatchOutcome),
    {
        let mut outcomes = Vec::with_capacity(self.queue.len());
        while let Some(outcome) = self.run_next(downloader, progress).await {
            on_done(&outcome);
            outcomes.push(outcome);
        }
        log::info!("[batch] all done ({} jobs)", outcomes.len());
        outcomes
    }
}
