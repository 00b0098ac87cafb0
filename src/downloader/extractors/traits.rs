// MediaEngine trait and common types

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::MediaInfo;
use crate::downloader::plan::ExtractionStep;
use crate::downloader::progress::ProgressSink;

/// Configuration shared by every engine call
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to cookies.txt file
    pub cookies_path: Option<String>,
    /// Browser to read cookies from (e.g. "chrome")
    pub cookies_from_browser: Option<String>,
    /// Socket timeout passed to the engine, in seconds
    pub socket_timeout: u32,
    /// Hard limit for a metadata dump, in seconds
    pub info_timeout: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            cookies_from_browser: None,
            socket_timeout: 30,
            info_timeout: 60,
        }
    }
}

impl EngineConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_cookies_from_browser(mut self, browser: Option<String>) -> Self {
        self.cookies_from_browser = browser;
        self
    }

    pub fn with_socket_timeout(mut self, seconds: u32) -> Self {
        self.socket_timeout = seconds;
        self
    }

    pub fn with_info_timeout(mut self, seconds: u64) -> Self {
        self.info_timeout = seconds;
        self
    }

    /// Network/auth arguments common to every engine invocation
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--socket-timeout".to_string(),
            self.socket_timeout.to_string(),
        ];

        if let Some(path) = &self.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        } else if let Some(browser) = &self.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }
}

/// What an extraction reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMedia {
    /// Media title as reported by the engine
    pub title: String,
    /// Final file paths the engine announced, if any
    pub files: Vec<PathBuf>,
}

impl ExtractedMedia {
    /// Title as it appears in file names for `suffix`.
    ///
    /// The engine sanitizes titles for the filesystem, so an announced file
    /// wins over the raw title.
    pub fn name_stem(&self, suffix: &str) -> String {
        self.files
            .iter()
            .filter_map(|f| f.file_stem().and_then(|s| s.to_str()))
            .find_map(|stem| stem.strip_suffix(suffix))
            .filter(|stem| !stem.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.title.clone())
    }
}

/// External extraction engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Check if this engine can be invoked
    fn is_available(&self) -> bool;

    /// Fetch metadata without downloading
    async fn fetch_info(&self, url: &str) -> Result<MediaInfo, DownloadError>;

    /// Run one extraction step into `destination`, reporting progress
    async fn extract(
        &self,
        url: &str,
        step: &ExtractionStep,
        destination: &Path,
        progress: &ProgressSink,
    ) -> Result<ExtractedMedia, DownloadError>;
}
