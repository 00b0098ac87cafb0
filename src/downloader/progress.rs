// Progress tracking - normalizes engine progress signals into ProgressEvents
//
// The engine is run with a progress template so every hook call arrives as one
// machine-readable line:
//   [progress] downloading| 53.2%|1048576.0|12
// `NA` marks a missing value. Plain `[download]` lines from older engines are
// understood as a fallback.

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc;

use super::models::ProgressEvent;

/// Progress template handed to the engine (`--progress-template`)
pub const PROGRESS_TEMPLATE: &str =
    "download:[progress] %(progress.status)s|%(progress._percent_str)s|%(progress.speed)s|%(progress.eta)s";

/// One engine progress callback
#[derive(Debug, Clone, PartialEq)]
pub enum EngineHook {
    Downloading {
        percent: String,
        speed: Option<f64>,
        eta: Option<u64>,
    },
    Finished,
    Other(String),
}

/// Map one callback to zero or more events, in emission order
pub fn map_hook(hook: &EngineHook) -> Vec<ProgressEvent> {
    match hook {
        EngineHook::Downloading { percent, speed, eta } => vec![
            ProgressEvent::Percent(parse_percent(percent)),
            ProgressEvent::Transfer {
                speed: speed.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(0.0),
                eta: eta.unwrap_or(0),
            },
        ],
        EngineHook::Finished => vec![ProgressEvent::Percent(100)],
        EngineHook::Other(_) => Vec::new(),
    }
}

/// `" 53.2%"` -> 53; anything unparsable -> 0
pub fn parse_percent(raw: &str) -> u8 {
    lazy_static! {
        static ref ANSI_RE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
    }
    let cleaned = ANSI_RE.replace_all(raw, "");
    let number = cleaned.trim().trim_end_matches('%').trim();
    match number.parse::<f64>() {
        Ok(v) if v.is_finite() => v.clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Parse one stdout line from the engine into a hook, if it is a progress line
pub fn parse_progress_line(line: &str) -> Option<EngineHook> {
    lazy_static! {
        static ref TEMPLATE_RE: Regex =
            Regex::new(r"^\[progress\]\s+(\w+)\|([^|]*)\|([^|]*)\|([^|]*)$").unwrap();
        // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
        static ref DOWNLOAD_RE: Regex = Regex::new(
            r"^\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*\S+(?:\s+at\s+(\S+/s))?(?:\s+ETA\s+(\S+))?"
        )
        .unwrap();
        static ref DONE_RE: Regex =
            Regex::new(r"^\[download\]\s+(?:100(?:\.0)?%\s+of|.+has already been downloaded)").unwrap();
    }

    let line = line.trim();

    if let Some(caps) = TEMPLATE_RE.captures(line) {
        let status = caps.get(1).map_or("", |m| m.as_str());
        let field = |i: usize| caps.get(i).map_or("", |m| m.as_str().trim());
        return Some(match status {
            "downloading" => EngineHook::Downloading {
                percent: field(2).to_string(),
                speed: field(3).parse::<f64>().ok(),
                eta: field(4).parse::<f64>().ok().map(|e| e.max(0.0) as u64),
            },
            "finished" => EngineHook::Finished,
            other => EngineHook::Other(other.to_string()),
        });
    }

    if DONE_RE.is_match(line) {
        return Some(EngineHook::Finished);
    }

    if let Some(caps) = DOWNLOAD_RE.captures(line) {
        return Some(EngineHook::Downloading {
            percent: caps.get(1).map_or("0", |m| m.as_str()).to_string(),
            speed: caps.get(2).and_then(|m| parse_rate(m.as_str())),
            eta: caps.get(3).and_then(|m| parse_clock(m.as_str())),
        });
    }

    None
}

/// `"374.36KiB/s"` -> bytes per second
fn parse_rate(raw: &str) -> Option<f64> {
    lazy_static! {
        static ref RATE_RE: Regex = Regex::new(r"^(\d+\.?\d*)\s*([KMGT]?i?B)/s$").unwrap();
    }
    let caps = RATE_RE.captures(raw.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2)?.as_str() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some(value * multiplier)
}

/// `"11:59"` / `"1:02:03"` -> seconds
fn parse_clock(raw: &str) -> Option<u64> {
    raw.split(':')
        .try_fold(0u64, |acc, part| part.parse::<u64>().ok().map(|v| acc * 60 + v))
}

/// Human-readable byte count, 1024-based
pub fn format_bytes(size: f64) -> String {
    let mut size = size;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

/// Label shown for a Transfer event; both halves are always rendered
pub fn format_speed_eta(speed: f64, eta: u64) -> String {
    let speed_str = if speed > 0.0 {
        format!("{:.2} MB/s", speed / 1024.0 / 1024.0)
    } else {
        "-".to_string()
    };
    let eta_str = if eta > 0 {
        format!("{} min {} s", eta / 60, eta % 60)
    } else {
        "-".to_string()
    };
    format!("Speed: {} | Remaining: {}", speed_str, eta_str)
}

/// Sending half of the progress channel; a disabled sink drops everything
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Bounded channel pair
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching; the job carries on
            let _ = tx.send(event).await;
        }
    }

    pub async fn hook(&self, hook: &EngineHook) {
        for event in map_hook(hook) {
            self.emit(event).await;
        }
    }
}
