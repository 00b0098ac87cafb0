// FormatSelector - turns the raw stream list into UI-friendly choices
//
// Handles:
// - (height, container) deduplication across codecs and bitrates
// - Size estimation in rounded megabytes
// - Container ranking (mp3, mp4, webm, mkv, then anything else)
// - Parsing a displayed quality descriptor back into constraints

use std::collections::HashSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::{StreamDescriptor, StreamOption, AUDIO_CONTAINER, VIDEO_CONTAINERS};

/// Fixed container ranking; anything not listed sorts after these
const CONTAINER_PRIORITY: [&str; 4] = ["mp3", "mp4", "webm", "mkv"];

/// Sentinel quality when no stream qualifies
pub const BEST_QUALITY: &str = "best";

/// One entry of the quality list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityChoice {
    Stream(StreamOption),
    Best,
}

impl fmt::Display for QualityChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(opt) => write!(f, "{}", opt),
            Self::Best => write!(f, "{}", BEST_QUALITY),
        }
    }
}

/// Resolver output: ranked qualities and ranked containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFormats {
    pub qualities: Vec<QualityChoice>,
    pub containers: Vec<String>,
}

impl ResolvedFormats {
    pub fn quality_labels(&self) -> Vec<String> {
        self.qualities.iter().map(|q| q.to_string()).collect()
    }

    /// The stored default when it is on offer, otherwise the top entry
    pub fn preferred_quality(&self, default: &str) -> String {
        let labels = self.quality_labels();
        if labels.iter().any(|l| l == default) {
            return default.to_string();
        }
        labels
            .into_iter()
            .next()
            .unwrap_or_else(|| BEST_QUALITY.to_string())
    }

    /// The stored default container when on offer, otherwise the top entry
    pub fn preferred_container(&self, default: &str) -> String {
        if self.containers.iter().any(|c| c == default) {
            return default.to_string();
        }
        self.containers
            .first()
            .cloned()
            .unwrap_or_else(|| AUDIO_CONTAINER.to_string())
    }
}

/// Constraints recovered from a quality descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualitySelection {
    pub height: Option<u32>,
    pub container: Option<String>,
}

impl QualitySelection {
    /// Parse `<height>p ... [<container>]`.
    ///
    /// Anything else (including the `best` sentinel) leaves both fields unset and
    /// the extraction falls back to best-available within the container.
    pub fn parse(descriptor: &str) -> Self {
        lazy_static! {
            static ref QUALITY_RE: Regex = Regex::new(r"^(\d+)p.*\[(\w+)\]").unwrap();
        }

        let Some(caps) = QUALITY_RE.captures(descriptor.trim()) else {
            log::debug!("[format] quality {:?} has no height/container, leaving unconstrained", descriptor);
            return Self::default();
        };

        let height = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let container = caps.get(2).map(|m| m.as_str().to_lowercase());
        Self { height, container }
    }
}

/// Format selector over raw stream descriptors
pub struct FormatSelector;

impl FormatSelector {
    /// Build the quality list and container list from raw descriptors
    pub fn resolve(streams: &[StreamDescriptor]) -> ResolvedFormats {
        let mut seen: HashSet<(u32, String)> = HashSet::new();
        let mut options: Vec<StreamOption> = Vec::new();
        let mut containers: Vec<String> = Vec::new();

        for stream in streams.iter().filter(|s| s.has_video()) {
            let ext = stream.ext.to_lowercase();

            if let Some(height) = stream.height.filter(|h| *h > 0) {
                if VIDEO_CONTAINERS.contains(&ext.as_str()) && seen.insert((height, ext.clone())) {
                    options.push(StreamOption {
                        height,
                        container: ext.clone(),
                        size_mb: Self::size_in_mb(stream.effective_size()),
                    });
                }
            }

            if !ext.is_empty() && !containers.contains(&ext) {
                containers.push(ext);
            }
        }

        if !containers.iter().any(|c| c == AUDIO_CONTAINER) {
            containers.push(AUDIO_CONTAINER.to_string());
        }

        // Stable sorts: equal keys keep first-seen order
        options.sort_by(|a, b| b.height.cmp(&a.height));
        containers.sort_by_key(|c| Self::container_rank(c));

        let qualities = if options.is_empty() {
            vec![QualityChoice::Best]
        } else {
            options.into_iter().map(QualityChoice::Stream).collect()
        };

        ResolvedFormats { qualities, containers }
    }

    fn container_rank(container: &str) -> usize {
        CONTAINER_PRIORITY
            .iter()
            .position(|c| *c == container)
            .unwrap_or(CONTAINER_PRIORITY.len())
    }

    fn size_in_mb(bytes: Option<u64>) -> Option<u64> {
        bytes.map(|b| (b as f64 / 1_048_576.0).round() as u64)
    }
}
