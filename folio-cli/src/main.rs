use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use flume::RecvTimeoutError;
use folio_core::{Config, OutlineItem, PageReady, PageStore, Rotation, Slot};
use folio_render::PdfiumOpener;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Render document pages through the folio page cache")]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Password for encrypted documents
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print page count, page geometry and outline as JSON
    Info {
        file: PathBuf,
    },
    /// Render a window of pages to PNG files
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    file: PathBuf,

    /// First page to render (0-based)
    #[arg(long, default_value_t = 0)]
    first: usize,

    /// Last page to render (0-based, inclusive); defaults to the last page
    #[arg(long)]
    last: Option<usize>,

    /// Target width in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    #[arg(long, value_enum, default_value_t = SlotArg::Primary)]
    slot: SlotArg,

    /// Clockwise quarter turns
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    rotate: i32,

    /// Render with inverted colors
    #[arg(long)]
    invert: bool,

    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Seconds to wait for the window to finish rendering
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Re-render whenever the file changes
    #[arg(long)]
    watch: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SlotArg {
    Primary,
    Secondary,
    Tertiary,
}

impl From<SlotArg> for Slot {
    fn from(value: SlotArg) -> Self {
        match value {
            SlotArg::Primary => Slot::Primary,
            SlotArg::Secondary => Slot::Secondary,
            SlotArg::Tertiary => Slot::Tertiary,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config = load_config(cli.config.as_deref())?;
    let opener = PdfiumOpener::new()?;
    let mut store = PageStore::new(Arc::new(opener), config);

    match cli.command {
        Command::Info { file } => {
            open(&mut store, &file, cli.password.as_deref())?;
            print_info(&store, &file)
        }
        Command::Render(args) => {
            open(&mut store, &args.file, cli.password.as_deref())?;
            render(&mut store, &args)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    debug!(?config, "loaded config");
    Ok(config)
}

fn open(store: &mut PageStore, path: &Path, password: Option<&str>) -> Result<usize> {
    store
        .open(path, password)
        .with_context(|| format!("failed to open {:?}", path))
}

#[derive(Debug, Serialize)]
struct DocumentSummary {
    path: PathBuf,
    page_count: usize,
    min_aspect: f32,
    max_aspect: f32,
    pages: Vec<PageSummary>,
    outline: Option<Vec<OutlineItem>>,
}

#[derive(Debug, Serialize)]
struct PageSummary {
    index: usize,
    width: f32,
    height: f32,
}

fn print_info(store: &PageStore, path: &Path) -> Result<()> {
    let pages = (0..store.page_count())
        .map(|index| -> Result<PageSummary> {
            Ok(PageSummary {
                index,
                width: store.page_width(index, false)?,
                height: store.page_height(index, false)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let summary = DocumentSummary {
        path: path.to_path_buf(),
        page_count: store.page_count(),
        min_aspect: store.min_aspect(false),
        max_aspect: store.max_aspect(false),
        pages,
        outline: store.get_toc(),
    };

    let stdout = io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &summary)?;
    println!();
    Ok(())
}

fn render(store: &mut PageStore, args: &RenderArgs) -> Result<()> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output directory {:?}", args.out))?;
    store.rotate(args.rotate, false);
    if store.colors_inverted() != args.invert {
        store.invert_colors();
    }

    let events = store.subscribe();
    render_window(store, args, &events)?;
    if !args.watch {
        return Ok(());
    }

    let (tx, rx) = flume::unbounded();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let _ = tx.send(event);
    })?;
    watcher.watch(&args.file, RecursiveMode::NonRecursive)?;
    info!(path = %args.file.display(), "watching for changes");

    while let Ok(event) = rx.recv() {
        match event {
            Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {}
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, "file watcher error");
                continue;
            }
        }
        // Editors tend to write in bursts; wait for the file to settle.
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}

        match store.reload() {
            Ok(page_count) => {
                info!(page_count, "reloaded document");
                if let Err(err) = render_window(store, args, &events) {
                    warn!(%err, "failed to render after reload");
                }
            }
            Err(err) => warn!(%err, "failed to reload document"),
        }
    }
    Ok(())
}

/// Request every page of the window and write each one out as soon as its
/// slot is current.
fn render_window(
    store: &PageStore,
    args: &RenderArgs,
    events: &flume::Receiver<PageReady>,
) -> Result<()> {
    let slot = Slot::from(args.slot);
    let (first, last) = page_range(args.first, args.last, store.page_count())?;
    store.collect(first, last, slot);

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.timeout);
    let mut remaining: BTreeSet<usize> = (first..=last).collect();

    while !remaining.is_empty() {
        let rotation = store.rotation();
        let mut written = Vec::new();
        for &page in &remaining {
            let view = store.get_page(page, slot, args.width)?;
            if !view.is_current(slot, args.width, rotation) || view.inverted != args.invert {
                continue;
            }
            if let Some(image) = view.image {
                let target = output_path(&args.out, page, rotation, args.invert);
                image
                    .save_with_format(&target, image::ImageFormat::Png)
                    .with_context(|| format!("failed to write {:?}", target))?;
                println!("{}", target.display());
                written.push(page);
            }
        }
        for page in written {
            remaining.remove(&page);
        }
        if remaining.is_empty() {
            break;
        }

        match events.recv_deadline(deadline) {
            Ok(PageReady { page }) => debug!(page, "page ready"),
            Err(RecvTimeoutError::Timeout) => bail!(
                "timed out after {}s with {} pages left to render",
                args.timeout,
                remaining.len()
            ),
            Err(RecvTimeoutError::Disconnected) => bail!("render worker went away"),
        }
    }

    info!(
        first,
        last,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rendered window"
    );
    Ok(())
}

fn page_range(first: usize, last: Option<usize>, page_count: usize) -> Result<(usize, usize)> {
    let Some(final_page) = page_count.checked_sub(1) else {
        bail!("document has no pages");
    };
    let last = last.unwrap_or(final_page).min(final_page);
    if first > last {
        bail!("first page {first} is past last page {last}");
    }
    Ok((first, last))
}

fn output_path(out: &Path, page: usize, rotation: Rotation, inverted: bool) -> PathBuf {
    let mut name = format!("page-{:04}", page + 1);
    if rotation != Rotation::NONE {
        name.push_str(&format!("-r{}", rotation.degrees()));
    }
    if inverted {
        name.push_str("-inv");
    }
    name.push_str(".png");
    out.join(name)
}

/// Full logs go to a daily file under the data dir, filtered by `FOLIO_LOG`
/// (default `info`). The terminal only gets warnings, since stdout carries
/// command output.
fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "folio.log"));
    let file_filter = EnvFilter::try_from_env("FOLIO_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(file_writer)
        .with_filter(file_filter);
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(terminal_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_range_clamps_to_document() {
        assert_eq!(page_range(0, None, 5).unwrap(), (0, 4));
        assert_eq!(page_range(2, Some(99), 5).unwrap(), (2, 4));
        assert!(page_range(6, None, 5).is_err());
        assert!(page_range(0, None, 0).is_err());
    }

    #[test]
    fn output_names_carry_view_state() {
        let out = Path::new("out");
        assert_eq!(
            output_path(out, 0, Rotation::NONE, false),
            Path::new("out/page-0001.png")
        );
        assert_eq!(
            output_path(out, 11, Rotation::from_quarter_turns(3), true),
            Path::new("out/page-0012-r270-inv.png")
        );
    }

    #[test]
    fn cli_parses_render_flags() {
        let cli = Cli::try_parse_from([
            "folio", "render", "doc.pdf", "--first", "2", "--last", "4", "--rotate", "-1",
            "--slot", "tertiary", "--invert",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render subcommand");
        };
        assert_eq!((args.first, args.last), (2, Some(4)));
        assert_eq!(args.rotate, -1);
        assert_eq!(Slot::from(args.slot), Slot::Tertiary);
        assert!(args.invert);
        assert!(!args.watch);
    }
}
