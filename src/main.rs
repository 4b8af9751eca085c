use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use thumbnail_loader::{
    FillMode, LoaderConfig, Priority, Status, ThumbnailCache, ThumbnailLoader,
};

#[derive(Parser)]
#[command(name = "thumbdeck")]
#[command(about = "Generate and warm gallery thumbnails in the shared disk cache")]
struct Cli {
    /// Override the cache root (defaults to the shared thumbnail store)
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a single thumbnail and print the cache entry it landed at
    Thumbnail {
        /// Source image, video or PDF
        path: PathBuf,

        #[arg(short = 'W', long, default_value = "128")]
        width: u32,

        #[arg(short = 'H', long, default_value = "128")]
        height: u32,

        /// Fill the requested rectangle exactly, cropping the excess
        #[arg(short, long)]
        crop: bool,

        /// Mime hint for generator dispatch (e.g. video/mp4)
        #[arg(long)]
        mime: Option<String>,

        /// Prefer a stored size that does not exceed the request
        #[arg(long)]
        bounded: bool,
    },

    /// Warm the cache for every image in a directory
    Warm {
        dir: PathBuf,

        #[arg(short = 'W', long, default_value = "256")]
        width: u32,

        #[arg(short = 'H', long, default_value = "256")]
        height: u32,

        /// Fill the requested rectangle exactly, cropping the excess
        #[arg(short, long)]
        crop: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = LoaderConfig::default();
    if let Some(root) = cli.cache_root {
        config.cache_root = root;
    }

    match cli.command {
        Commands::Thumbnail {
            path,
            width,
            height,
            crop,
            mime,
            bounded,
        } => run_thumbnail(config, path, (width, height), crop, mime.as_deref(), bounded),
        Commands::Warm {
            dir,
            width,
            height,
            crop,
        } => run_warm(config, dir, (width, height), crop),
    }
}

fn run_thumbnail(
    config: LoaderConfig,
    path: PathBuf,
    size: (u32, u32),
    crop: bool,
    mime: Option<&str>,
    bounded: bool,
) -> Result<()> {
    let cache = ThumbnailCache::new(&config);
    let uri = path.to_string_lossy();

    let data = cache
        .request_thumbnail(&uri, size, crop, !bounded, mime)
        .with_context(|| format!("couldn't produce a thumbnail for {}", path.display()))?;

    match data.path() {
        Some(entry) => println!("{}", entry.display()),
        None => println!("(generated in memory only; cache write failed)"),
    }
    log::info!("served at ladder size {}", data.size());
    Ok(())
}

fn run_warm(config: LoaderConfig, dir: PathBuf, size: (u32, u32), crop: bool) -> Result<()> {
    const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(&dir).with_context(|| format!("couldn't read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if known {
            files.push(path);
        }
    }
    if files.is_empty() {
        bail!("no media files found in {}", dir.display());
    }

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let loader = ThumbnailLoader::with_wake_hook(
        config,
        Some(Box::new(move || {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(());
            }
        })),
    );

    let fill = if crop {
        FillMode::PreserveAspectCrop
    } else {
        FillMode::PreserveAspectFit
    };
    for (index, file) in files.iter().enumerate() {
        loader.attach(
            index as u64,
            &file.to_string_lossy(),
            size,
            fill,
            Priority::Normal,
            None,
        );
    }

    let total = files.len();
    let mut done = 0;
    let mut failed = 0;
    while done < total {
        let _ = rx.recv_timeout(Duration::from_millis(200));
        for delivery in loader.drain_completions() {
            done += 1;
            if delivery.status != Status::Ready {
                failed += 1;
                log::warn!("failed: {}", files[delivery.item as usize].display());
            }
        }
    }

    println!("warmed {} thumbnails ({failed} failed)", total - failed);
    Ok(())
}
