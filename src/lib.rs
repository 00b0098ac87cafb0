pub mod app;
pub mod downloader;
pub mod settings;

pub use app::{App, DownloadHandle, FetchedInfo};
pub use settings::{History, Settings, SettingsStore};

/// Install the env_logger backend; `RUST_LOG` still wins when set
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}
