use std::collections::HashMap;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use webimage::infrastructure::{AppConfig, FileConfig, LogLevel};
use webimage::{ImageEngine, ImageEvent, ImageRequest, LoadOptions, TargetId};

fn init_logging(config: &AppConfig, level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(std::sync::Arc::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "logging initialized");
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = AppConfig::parse();
    let file = cli
        .config
        .as_deref()
        .map(FileConfig::load)
        .unwrap_or_default();

    init_logging(&cli, cli.effective_log_level(&file))?;
    info!(version = webimage::VERSION, "starting webimage");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = ImageEngine::new(cli.engine_config(&file), event_tx).await?;

    let options = LoadOptions {
        force_refresh: cli.force_refresh,
        ..LoadOptions::default()
    };

    let mut pending: HashMap<TargetId, String> = HashMap::new();
    for url in &cli.urls {
        let target = TargetId::mint();
        pending.insert(target, url.clone());
        let request = ImageRequest::from_url(url).with_options(options.clone());
        engine.start_load(target, request);
    }

    let mut failures = 0usize;
    while !pending.is_empty() {
        let Some(event) = event_rx.recv().await else {
            break;
        };
        match event {
            ImageEvent::Loaded {
                target,
                image,
                source,
                ..
            } => {
                if let Some(url) = pending.remove(&target) {
                    println!(
                        "{url}: {}x{} ({source:?})",
                        image.width(),
                        image.height()
                    );
                }
            }
            ImageEvent::Failed { target, error, .. } => {
                if let Some(url) = pending.remove(&target) {
                    eprintln!("{url}: {error}");
                    failures += 1;
                }
            }
            ImageEvent::Placeholder { .. } => {}
        }
    }

    let stats = engine.memory_stats();
    info!(%stats, cache_bytes = engine.cache_size_bytes().await, "done");

    engine.shutdown().await;

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
