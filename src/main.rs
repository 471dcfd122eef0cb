//! subforge - subtitle job queue for a home media library
//!
//! Scans a media tree, queues videos, transcribes them with whisper.cpp and
//! translates the subtitles through an LLM provider.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use subforge::cli::{Args, Commands, ConfigAction};
use subforge::config::Config;
use subforge::queue::{Job, JobQueue, JobStatus, Pipeline, Store};
use subforge::scanner::{MediaFilter, MediaScanner};
use subforge::transcribe::{Transcriber, TranscriberFactory};
use subforge::translate::{ProviderFactory, SubtitleTranslator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let file_config = match &args.config {
        Some(config_path) => Some(Config::from_file(config_path)?),
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Some(Config::from_file("config.toml")?)
            } else {
                None
            }
        }
    };
    let config = file_config.clone().unwrap_or_default();

    match args.command {
        Commands::Serve => serve(file_config, config).await?,
        Commands::Scan { subdirectory, missing } => {
            let scanner = scanner_for(&config);
            let listing = scanner.list_directory(&subdirectory)?;
            open_store(&config)?.upsert_media_files(&listing.videos, &config.translate.target_language)?;

            if !missing {
                for dir in &listing.directories {
                    println!("[dir]  {}", dir.display());
                }
            }
            for video in &listing.videos {
                if missing && video.has_subtitle() {
                    continue;
                }
                let languages: Vec<&str> = video.subtitles.iter().map(|s| s.language.as_str()).collect();
                println!(
                    "{:<8} {:>8.1} MB  {}  {}",
                    if video.has_subtitle() { "[subs]" } else { "[none]" },
                    video.size as f64 / 1024.0 / 1024.0,
                    video.relative_path.display(),
                    languages.join(",")
                );
            }
        }
        Commands::Library { directory, missing, subtitled, untranslated } => {
            let filter = MediaFilter {
                directory: directory.map(PathBuf::from),
                has_subtitle: match (missing, subtitled) {
                    (true, _) => Some(false),
                    (_, true) => Some(true),
                    _ => None,
                },
                has_translated: untranslated.then_some(false),
            };
            let files = open_store(&config)?.list_media(&filter)?;

            if files.is_empty() {
                println!("No videos recorded. Run `subforge scan` first.");
            }
            for file in &files {
                let languages: Vec<&str> = file.subtitles.iter().map(|s| s.language.as_str()).collect();
                println!(
                    "{:<8} {:<6} {:>8.1} MB  {}  {}",
                    if file.has_subtitle() { "[subs]" } else { "[none]" },
                    if file.has_translated { "[tr]" } else { "" },
                    file.size as f64 / 1024.0 / 1024.0,
                    file.relative_path.display(),
                    languages.join(",")
                );
            }
        }
        Commands::Subdirs { depth } => {
            for dir in scanner_for(&config).discover_subdirectories(depth) {
                println!("{}", dir.display());
            }
        }
        Commands::Enqueue { paths, missing_in } => {
            let store = open_store(&config)?;
            let mut targets: Vec<PathBuf> = paths.iter().map(|p| absolute(p)).collect();

            if let Some(subdirectory) = missing_in {
                let listing = scanner_for(&config).list_directory(&subdirectory)?;
                store.upsert_media_files(&listing.videos, &config.translate.target_language)?;
                targets.extend(listing.missing_subtitles().map(|v| v.path.clone()));
            }

            if targets.is_empty() {
                println!("Nothing to enqueue.");
                return Ok(());
            }

            let outcome = store.enqueue_batch(&targets)?;
            println!("Queued {} jobs.", outcome.queued.len());
            for path in &outcome.skipped {
                println!("Skipped (already queued): {}", path.display());
            }
        }
        Commands::List { status } => {
            let store = open_store(&config)?;
            let status = status.map(|s| s.parse::<JobStatus>()).transpose()?;
            let jobs = store.list(status)?;

            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                print_jobs(&jobs);
            }

            let counts = store.counts()?;
            println!(
                "\n{} queued, {} running, {} paused, {} done, {} failed{}",
                counts.queued,
                counts.in_flight(),
                counts.paused,
                counts.done,
                counts.failed,
                if store.is_paused()? { " (queue paused)" } else { "" }
            );
        }
        Commands::Show { id } => {
            let store = open_store(&config)?;
            let job = store.get(id)?;

            println!("Job {}", job.id);
            println!("File:     {}", job.file_path);
            println!("Status:   {} ({}%)", job.status, job.progress);
            println!("Message:  {}", job.message.as_deref().unwrap_or("-"));
            println!("Attempts: {}", job.attempts);
            println!("Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Updated:  {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
            if let Some(error) = &job.error_message {
                println!("Error:    {}", error);
            }

            let history = store.error_history(id)?;
            if !history.is_empty() {
                println!("\nError history:");
                for entry in history {
                    println!(
                        "  #{} {}  {}",
                        entry.attempt,
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.message
                    );
                }
            }
        }
        Commands::Retry { id } => {
            open_store(&config)?.retry(id)?;
            println!("Job {} queued for retry.", id);
        }
        Commands::Pause { id } => {
            let store = open_store(&config)?;
            match id {
                Some(id) => match store.pause_job(id)? {
                    JobStatus::Paused => println!("Job {} paused.", id),
                    status => println!("Job {} is {}; it will pause after its current step.", id, status),
                },
                None => {
                    let parked = store.pause_all()?;
                    println!("Queue paused, {} waiting jobs parked. Running jobs will finish.", parked);
                }
            }
        }
        Commands::Resume { id } => {
            let store = open_store(&config)?;
            match id {
                Some(id) => {
                    let status = store.resume_job(id)?;
                    println!("Job {} is {}.", id, status);
                }
                None => {
                    let resumed = store.resume_all()?;
                    println!("Queue resumed, {} jobs re-queued.", resumed);
                }
            }
        }
        Commands::Delete { id } => {
            open_store(&config)?.delete(id)?;
            println!("Job {} deleted.", id);
        }
        Commands::Clear => {
            let removed = open_store(&config)?.clear_finished()?;
            println!("Removed {} finished jobs.", removed);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let shown = match file_config {
                    Some(config) => config,
                    None => open_store(&config)?.load_config()?.unwrap_or(config),
                };
                print!("{}", shown.to_toml()?);
            }
            ConfigAction::Init { output } => {
                if output.exists() {
                    anyhow::bail!("{} already exists", output.display());
                }
                Config::default().save_to_file(&output)?;
                println!("Wrote default configuration to {}", output.display());
            }
            ConfigAction::CheckProvider => {
                ProviderFactory::health_check(&config.translate).await?;
                println!(
                    "Provider {} is reachable (model {}).",
                    config.translate.effective_base_url(),
                    config.translate.effective_model()
                );
            }
        },
    }

    Ok(())
}

async fn serve(file_config: Option<Config>, config: Config) -> Result<()> {
    info!("Starting subforge worker");

    let store = open_store(&config)?;
    let config = store.effective_config(file_config)?;

    let transcriber: Arc<dyn Transcriber> =
        Arc::from(TranscriberFactory::create_transcriber(config.transcriber.clone()));

    let translator = if config.translate.enabled {
        if let Err(e) = ProviderFactory::health_check(&config.translate).await {
            warn!("Translation provider check failed: {}", e);
        }
        let provider = ProviderFactory::create(&config.translate);
        Some(SubtitleTranslator::new(provider, &config.translate))
    } else {
        info!("Translation disabled, only source subtitles will be written");
        None
    };

    let pipeline = Pipeline::new(store.clone(), transcriber, translator).with_config(&config);
    let queue = JobQueue::new(store, pipeline, &config.queue);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, letting running jobs finish");
            signal_token.cancel();
        }
    });

    queue.run(shutdown).await?;
    Ok(())
}

fn open_store(config: &Config) -> Result<Store> {
    Ok(Store::open(&config.queue.database_path)?)
}

fn scanner_for(config: &Config) -> MediaScanner {
    MediaScanner::new(&config.media.root).with_max_depth(config.media.scan_depth)
}

/// Jobs are keyed by absolute path
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn print_jobs(jobs: &[Job]) {
    println!("{:<6} {:<13} {:>5}  {:<40} {}", "ID", "Status", "%", "Message", "File");
    println!("{}", "-".repeat(100));
    for job in jobs {
        let message = job.error_message.as_deref().or(job.message.as_deref()).unwrap_or("");
        let message: String = message.chars().take(40).collect();
        println!(
            "{:<6} {:<13} {:>5}  {:<40} {}",
            job.id,
            job.status.to_string(),
            job.progress,
            message,
            job.file_path
        );
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subforge").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subforge.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("subforge.log").display());
    Ok(())
}
