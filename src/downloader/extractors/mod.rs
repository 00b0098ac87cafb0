// Extraction engine - the external tool that resolves URLs and fetches media
//
// Everything above this module talks to `MediaEngine`; the yt-dlp binary is
// the only production implementation, tests plug in fakes.

mod cli;
mod traits;

pub use cli::YtDlpEngine;
pub use traits::{EngineConfig, ExtractedMedia, MediaEngine};
