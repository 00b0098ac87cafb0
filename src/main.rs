use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use easydl::downloader::models::{ClipRange, DownloadIntent, DownloadMode, JobStage, ProgressEvent, SubtitleLanguage};
use easydl::downloader::progress::{format_speed_eta, ProgressSink};
use easydl::downloader::tools::ToolManager;
use easydl::downloader::{Downloader, EngineConfig, FfmpegTranscoder, YtDlpEngine};
use easydl::settings::{resolve_config_dir, SettingsStore};
use easydl::App;

#[derive(Parser)]
#[command(name = "easydl")]
#[command(author, version, about = "Download media with yt-dlp and post-process it with ffmpeg", long_about = None)]
struct Cli {
    /// Directory holding settings.json and history.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Proxy URL handed to yt-dlp
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Path to a cookies.txt file
    #[arg(long, global = true)]
    cookies: Option<String>,

    /// Read cookies from this browser
    #[arg(long, global = true)]
    cookies_from_browser: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata and the available qualities for a URL
    Fetch { url: String },

    /// Download one URL
    Download {
        url: String,
        #[command(flatten)]
        options: JobOptions,
    },

    /// Download every URL listed in a file, one per line ("-" reads stdin)
    Batch {
        file: PathBuf,
        #[command(flatten)]
        options: JobOptions,
    },

    /// List or clear download history
    History {
        #[arg(long)]
        clear: bool,
    },

    /// Report yt-dlp and ffmpeg availability
    Tools,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set { key: String, value: String },
}

#[derive(Args)]
struct JobOptions {
    /// Destination directory (defaults to the stored download path)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Container: mp3, mp4, webm, mkv
    #[arg(short, long)]
    format: Option<String>,

    /// Quality label, e.g. "720p (45 MB) [mp4]" or "best"
    #[arg(short, long)]
    quality: Option<String>,

    /// merge, video, audio or separate
    #[arg(short, long, default_value = "merge")]
    mode: DownloadMode,

    /// Download the whole playlist
    #[arg(long)]
    playlist: bool,

    /// Download subtitles: auto, all or a language code
    #[arg(long, num_args = 0..=1, default_missing_value = "auto")]
    subs: Option<SubtitleLanguage>,

    /// Clip start (HH:MM:SS, MM:SS or seconds)
    #[arg(long)]
    clip_start: Option<String>,

    /// Clip end (HH:MM:SS, MM:SS or seconds)
    #[arg(long)]
    clip_end: Option<String>,
}

impl JobOptions {
    fn intent(&self, app: &App, url: &str) -> Result<DownloadIntent> {
        let mut intent = app
            .default_intent(url)
            .with_mode(self.mode)
            .with_playlist(self.playlist)
            .with_subtitles(self.subs.clone());

        if let Some(dir) = &self.dir {
            intent.destination = dir.clone();
        }
        if let Some(format) = &self.format {
            intent = intent.with_container(format.clone());
        }
        if let Some(quality) = &self.quality {
            intent = intent.with_quality(quality.clone());
        }
        if self.clip_start.is_some() || self.clip_end.is_some() {
            let range = ClipRange::parse(
                self.clip_start.as_deref().unwrap_or(""),
                self.clip_end.as_deref().unwrap_or(""),
            )?;
            intent = intent.with_clip(Some(range));
        }
        Ok(intent)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    easydl::init_logging(cli.verbose);

    let store = SettingsStore::new(resolve_config_dir(cli.config_dir.clone()));
    let engine_config = EngineConfig::default()
        .with_proxy(cli.proxy.clone())
        .with_cookies_path(cli.cookies.clone())
        .with_cookies_from_browser(cli.cookies_from_browser.clone());
    let downloader = Downloader::new(
        Arc::new(YtDlpEngine::new(engine_config)),
        Arc::new(FfmpegTranscoder::new()),
    );
    let mut app = App::new(store, downloader).context("Failed to load settings")?;

    match cli.command {
        Commands::Fetch { url } => fetch(&app, &url).await,
        Commands::Download { url, options } => download(&mut app, &url, &options).await,
        Commands::Batch { file, options } => batch(&mut app, &file, &options).await,
        Commands::History { clear } => history(&mut app, clear),
        Commands::Tools => {
            for tool in ToolManager::new().get_all_tools() {
                println!(
                    "{:<8} {:<5} {:<40} {}",
                    tool.name,
                    if tool.is_available { "ok" } else { "MISSING" },
                    tool.path.unwrap_or_else(|| "-".to_string()),
                    tool.version.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Settings { action } => settings(&mut app, action),
    }
}

async fn fetch(app: &App, url: &str) -> Result<()> {
    let fetched = app
        .fetch_info(url)
        .await
        .with_context(|| format!("Failed to fetch info for {}", url))?;

    println!("Title:    {}", fetched.info.title);
    println!("Uploader: {}", fetched.info.uploader);
    println!("Duration: {}", fetched.info.duration_label());
    println!("Formats:  {}", fetched.formats.containers.join(", "));
    println!("Qualities:");
    for label in fetched.formats.quality_labels() {
        let marker = if label == fetched.quality { "*" } else { " " };
        println!("  {} {}", marker, label);
    }
    Ok(())
}

async fn download(app: &mut App, url: &str, options: &JobOptions) -> Result<()> {
    let intent = options.intent(app, url)?;
    let mut handle = app.start_download(intent);
    print_progress(&mut handle.progress).await;
    let result = handle.wait().await;

    app.finish_job(&result).context("Failed to update history")?;
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}: {}", result.message, result.title);
    if result.has_output() {
        println!("{}", result.output);
    }
    Ok(())
}

async fn batch(app: &mut App, file: &PathBuf, options: &JobOptions) -> Result<()> {
    let text = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?
    };

    let template = options.intent(app, "")?;
    let (sink, mut rx) = ProgressSink::channel(256);
    let printer = tokio::spawn(async move { print_progress(&mut rx).await });
    let outcomes = app.run_batch(&text, template, &sink).await;
    drop(sink);
    let _ = printer.await;

    let failed = outcomes.iter().filter(|o| !o.result.success).count();
    for outcome in &outcomes {
        let status = if outcome.result.success { "ok" } else { "FAILED" };
        println!("[{}] {} {}", status, outcome.url, outcome.result.message);
    }
    println!("{} of {} jobs succeeded", outcomes.len() - failed, outcomes.len());
    Ok(())
}

fn history(app: &mut App, clear: bool) -> Result<()> {
    if clear {
        app.clear_history().context("Failed to clear history")?;
        println!("History cleared");
        return Ok(());
    }
    for entry in app.history().visible() {
        println!("{}", entry);
    }
    Ok(())
}

fn settings(app: &mut App, action: Option<SettingsAction>) -> Result<()> {
    match action.unwrap_or(SettingsAction::Show) {
        SettingsAction::Show => {
            println!("{}", serde_json::to_string_pretty(app.settings())?);
        }
        SettingsAction::Set { key, value } => {
            app.update_setting(&key, &value)
                .with_context(|| format!("Failed to set {}", key))?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

async fn print_progress(rx: &mut mpsc::Receiver<ProgressEvent>) {
    let mut percent = 0u8;
    let mut label = format_speed_eta(0.0, 0);
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Percent(p) => percent = p,
            ProgressEvent::Transfer { speed, eta } => label = format_speed_eta(speed, eta),
            ProgressEvent::Stage(stage) => {
                let line = match stage {
                    JobStage::Extracting { step, total, label } => format!("Downloading {} ({}/{})", label, step, total),
                    JobStage::Remuxing(path) => format!("Remuxing {}", path.display()),
                    JobStage::Clipping(path) => format!("Clipping {}", path.display()),
                };
                eprintln!("\n{}", line);
                continue;
            }
        }
        eprint!("\r{:>3}% | {}   ", percent, label);
        let _ = std::io::stderr().flush();
    }
    eprintln!();
}
