mod cli;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use cli::Args;
use idxd_loader::{
    Dispatch, ImageFileDecoder, LoaderConfig, MediaKind, MediaSession, SessionEvent,
};

#[derive(Debug, Default)]
struct Tally {
    delivered: usize,
    from_cache: usize,
    failed: usize,
    shown_kind: Option<MediaKind>,
}

fn scan(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut walker = WalkDir::new(dir).follow_links(true);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| MediaKind::from_path(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Show one file and wait until the session has answered for it.
async fn show(session: &MediaSession, tally: &RefCell<Tally>, path: &Path) {
    let needs_teardown = tally
        .borrow()
        .shown_kind
        .is_some_and(MediaKind::needs_teardown);
    if needs_teardown {
        session.release_current();
    }

    if session.request_show(path).is_none() {
        return;
    }

    while let Some(dispatch) = session.dispatch_next().await {
        match dispatch {
            Dispatch::Delivered | Dispatch::Failed => return,
            Dispatch::Discarded | Dispatch::Dropped => continue,
        }
    }
}

fn neighbours(files: &[PathBuf], index: usize, radius: usize) -> impl Iterator<Item = &PathBuf> {
    let before = index.saturating_sub(radius)..index;
    let after = (index + 1)..files.len().min(index + 1 + radius);
    // Ahead first; that is the usual direction of travel.
    files[after].iter().chain(files[before].iter().rev())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("idxd_loader=info".parse()?),
        )
        .init();

    let files = scan(&args.dir, args.recursive)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;
    if files.is_empty() {
        warn!(dir = %args.dir.display(), "No media files found");
        return Ok(());
    }
    info!(count = files.len(), dir = %args.dir.display(), "Found media files");

    let mut config = LoaderConfig::from_env();
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(mb) = args.cache_mb {
        config = config.with_cache_mb(mb);
    }

    let tally = Rc::new(RefCell::new(Tally::default()));
    let sink = Rc::clone(&tally);
    let session = MediaSession::new(config, ImageFileDecoder::new(), move |event| {
        let mut tally = sink.borrow_mut();
        match event {
            SessionEvent::Delivered {
                key,
                meta,
                from_cache,
                ..
            } => {
                debug!(
                    %key,
                    kind = ?meta.kind,
                    width = meta.width,
                    height = meta.height,
                    frames = meta.frame_count,
                    from_cache,
                    "Showing"
                );
                tally.delivered += 1;
                if from_cache {
                    tally.from_cache += 1;
                }
                tally.shown_kind = Some(meta.kind);
            }
            SessionEvent::Failed { key, error } => {
                warn!(%key, %error, "Could not show media");
                tally.failed += 1;
                tally.shown_kind = None;
            }
        }
    });

    for kind in [MediaKind::Animation, MediaKind::VideoFrame] {
        session.set_release_hook(kind, move |entry| {
            info!(key = %entry.key, ?kind, bytes = entry.size_bytes(), "Tearing down media");
        });
    }

    let started = Instant::now();
    for (index, path) in files.iter().enumerate() {
        show(&session, &tally, path).await;
        session.prefetch(neighbours(&files, index, args.prefetch));
    }
    let forward = started.elapsed();

    let started = Instant::now();
    for path in files.iter().rev() {
        show(&session, &tally, path).await;
    }
    let backward = started.elapsed();

    session.close();

    let tally = tally.borrow();
    let stats = session.cache().stats();
    info!(
        files = files.len(),
        delivered = tally.delivered,
        from_cache = tally.from_cache,
        failed = tally.failed,
        forward_ms = forward.as_millis() as u64,
        backward_ms = backward.as_millis() as u64,
        "Walk complete"
    );
    info!(
        entries = stats.entries,
        bytes = stats.bytes,
        capacity = stats.capacity,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        "Cache summary"
    );

    Ok(())
}
