use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::decoder::{Destination, DocumentOpener, LinkTarget, OutlineItem, PageDecoder, TextRegion};
use crate::error::{InvalidPageIndex, OpenError};
use crate::gc::GarbageCollector;
use crate::jump::JumpHistory;
use crate::page::{PageRecord, PageView};
use crate::queue::RequestQueue;
use crate::worker::{RenderWorker, WorkerState};
use crate::{Rotation, Slot};

/// Notification that new content for a page is cached.
///
/// Carries the page only; receivers re-query [`PageStore::get_page`] for
/// the slots they display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageReady {
    pub page: usize,
}

/// Everything the store and the render worker share about one open document.
pub(crate) struct Document {
    pub(crate) decoder: Arc<dyn PageDecoder>,
    pub(crate) pages: Box<[PageRecord]>,
    pub(crate) queue: RequestQueue,
    pub(crate) gc: GarbageCollector,
    min_aspect: f32,
    max_aspect: f32,
}

impl Document {
    /// Read the geometry of every page up front. A page whose size cannot be
    /// read is kept as an empty 0x0 page.
    pub(crate) fn load(decoder: Arc<dyn PageDecoder>) -> Self {
        let page_count = decoder.page_count();
        let mut pages = Vec::with_capacity(page_count);
        let mut min_aspect = f32::MAX;
        let mut max_aspect = 0.0f32;

        for page in 0..page_count {
            let (width, height) = match decoder.page_size(page) {
                Ok((width, height)) if usable(width) && usable(height) => (width, height),
                Ok((width, height)) => {
                    warn!(page, width, height, "page has degenerate geometry");
                    (0.0, 0.0)
                }
                Err(err) => {
                    warn!(%err, page, "failed to load page geometry");
                    (0.0, 0.0)
                }
            };
            if width > 0.0 {
                let aspect = width / height;
                min_aspect = min_aspect.min(aspect);
                max_aspect = max_aspect.max(aspect);
            }
            pages.push(PageRecord::new(width, height));
        }

        if min_aspect > max_aspect {
            min_aspect = 1.0;
            max_aspect = 1.0;
        }

        Self {
            decoder,
            pages: pages.into_boxed_slice(),
            queue: RequestQueue::new(),
            gc: GarbageCollector::new(),
            min_aspect,
            max_aspect,
        }
    }
}

fn usable(extent: f32) -> bool {
    extent.is_finite() && extent > 0.0
}

/// Rotation and color inversion shared with the worker without locking.
///
/// Readers compare these against the values recorded per page, so a racy
/// read costs at most one redundant render.
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    rotation: AtomicU8,
    inverted: AtomicBool,
}

impl ViewState {
    pub(crate) fn rotation(&self) -> Rotation {
        Rotation::from_quarter_turns(i32::from(self.rotation.load(Ordering::Relaxed)))
    }

    pub(crate) fn set_rotation(&self, rotation: Rotation) {
        self.rotation.store(rotation.quarter_turns(), Ordering::Relaxed);
    }

    pub(crate) fn inverted(&self) -> bool {
        self.inverted.load(Ordering::Relaxed)
    }

    pub(crate) fn toggle_inverted(&self) -> bool {
        !self.inverted.fetch_xor(true, Ordering::Relaxed)
    }
}

/// Subscribers to [`PageReady`] notifications.
#[derive(Debug, Default)]
pub(crate) struct Observers {
    senders: Mutex<Vec<Sender<PageReady>>>,
}

impl Observers {
    pub(crate) fn subscribe(&self) -> Receiver<PageReady> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber and forget the disconnected ones.
    pub(crate) fn notify(&self, page: usize) {
        self.senders
            .lock()
            .retain(|tx| tx.send(PageReady { page }).is_ok());
    }
}

struct Loaded {
    document: Arc<Document>,
    worker: RenderWorker,
}

#[derive(Debug, Clone)]
struct Source {
    path: PathBuf,
    password: Option<String>,
}

/// Page cache for one document at a time.
///
/// All methods are meant to be called from the UI thread. Lookups never wait
/// for rendering: they return what is cached and queue the rest for the
/// background [`RenderWorker`], which announces finished pages through
/// [`subscribe`](Self::subscribe).
pub struct PageStore {
    opener: Arc<dyn DocumentOpener>,
    config: Config,
    view: Arc<ViewState>,
    observers: Arc<Observers>,
    source: Option<Source>,
    loaded: Option<Loaded>,
    locked: bool,
    jumps: JumpHistory,
}

impl PageStore {
    pub fn new(opener: Arc<dyn DocumentOpener>, config: Config) -> Self {
        Self {
            opener,
            config,
            view: Arc::new(ViewState::default()),
            observers: Arc::new(Observers::default()),
            source: None,
            loaded: None,
            locked: false,
            jumps: JumpHistory::new(),
        }
    }

    /// Open `path`, replacing the current document. On failure the store is
    /// left empty and invalid.
    #[instrument(skip(self, path, password), fields(path = %path.display()))]
    pub fn open(&mut self, path: &Path, password: Option<&str>) -> Result<usize, OpenError> {
        self.close();
        self.source = Some(Source {
            path: path.to_path_buf(),
            password: password.map(str::to_owned),
        });
        self.locked = false;

        let decoder = match self.opener.open(path, password) {
            Ok(decoder) => decoder,
            Err(err) => {
                self.locked = matches!(err, OpenError::PasswordRequired);
                warn!(%err, "failed to open document");
                return Err(err);
            }
        };

        let document = Arc::new(Document::load(decoder));
        let worker = RenderWorker::spawn(
            Arc::clone(&document),
            Arc::clone(&self.view),
            Arc::clone(&self.observers),
            &self.config,
        )
        .map_err(OpenError::WorkerSpawn)?;

        let page_count = document.pages.len();
        info!(page_count, "opened document");
        self.loaded = Some(Loaded { document, worker });
        Ok(page_count)
    }

    /// Open the last opened path again, e.g. after the file changed on disk.
    /// Rotation, inversion, jump history and subscribers are kept.
    pub fn reload(&mut self) -> Result<usize, OpenError> {
        let Some(source) = self.source.clone() else {
            return Err(OpenError::NotFound(PathBuf::new()));
        };
        self.open(&source.path, source.password.as_deref())
    }

    /// Stop the worker and drop the document. The worker is joined before
    /// any document resources are released.
    pub fn close(&mut self) {
        if let Some(mut loaded) = self.loaded.take() {
            loaded.worker.shutdown();
            loaded.document.queue.clear();
            loaded.document.gc.clear();
            info!("closed document");
        }
    }

    pub fn is_valid(&self) -> bool {
        self.loaded.is_some()
    }

    /// The last open attempt failed for lack of a (correct) password.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn path(&self) -> Option<&Path> {
        self.source.as_ref().map(|source| source.path.as_path())
    }

    pub fn page_count(&self) -> usize {
        self.loaded
            .as_ref()
            .map_or(0, |loaded| loaded.document.pages.len())
    }

    pub fn subscribe(&self) -> Receiver<PageReady> {
        self.observers.subscribe()
    }

    fn record(&self, page: usize) -> Result<(&Document, &PageRecord), InvalidPageIndex> {
        let invalid = InvalidPageIndex {
            page,
            page_count: self.page_count(),
        };
        let document = self.loaded.as_ref().ok_or(invalid)?.document.as_ref();
        let record = document.pages.get(page).ok_or(invalid)?;
        Ok((document, record))
    }

    /// Best cached content of `page` for `slot`; queues a render at `width`
    /// unless the slot is already current.
    pub fn get_page(&self, page: usize, slot: Slot, width: u32) -> Result<PageView, InvalidPageIndex> {
        let (document, record) = self.record(page)?;
        let rotation = self.view.rotation();
        let inverted = self.view.inverted();

        let (view, stale) = record.with_content(|content| {
            content.sync_inversion(inverted);
            let stale = !content.is_current(slot, width, rotation);
            (record.snapshot(page, slot, content), stale)
        });

        if stale && width > 0 && document.queue.enqueue(page, slot, width) {
            debug!(page, ?slot, width, "queued render");
        }
        Ok(view)
    }

    /// Declare `keep_min..=keep_max` as the pages `slot` still needs. Cached
    /// rasters of that slot outside the window are dropped. A non-empty
    /// window also drops the slot's pending requests outside it.
    ///
    /// Only the primary slot moves the render-priority center, to the
    /// window's midpoint.
    pub fn collect(&self, keep_min: usize, keep_max: usize, slot: Slot) {
        let Some(loaded) = self.loaded.as_ref() else {
            return;
        };
        let document = &loaded.document;

        if slot == Slot::Primary && keep_min <= keep_max {
            document
                .queue
                .set_center(keep_min + (keep_max - keep_min) / 2);
        }
        let evicted = document.gc.evict(&document.pages, slot, keep_min, keep_max);
        if keep_min > keep_max {
            debug!(keep_min, keep_max, ?slot, evicted, "collected empty window");
            return;
        }
        let dropped = document.queue.retain_window(slot, keep_min, keep_max);
        if evicted > 0 || dropped > 0 {
            debug!(keep_min, keep_max, ?slot, evicted, dropped, "collected pages");
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.loaded
            .as_ref()
            .map_or(0, |loaded| loaded.document.queue.len())
    }

    pub fn worker_state(&self) -> Option<WorkerState> {
        self.loaded.as_ref().map(|loaded| loaded.worker.state())
    }

    pub fn rotation(&self) -> Rotation {
        self.view.rotation()
    }

    /// Rotate by `delta` quarter turns, or to `delta` when not `relative`.
    /// Cached pages are re-rendered lazily on their next lookup.
    pub fn rotate(&self, delta: i32, relative: bool) {
        let rotation = if relative {
            self.view.rotation().rotated_by(delta)
        } else {
            Rotation::from_quarter_turns(delta)
        };
        self.view.set_rotation(rotation);
    }

    pub fn colors_inverted(&self) -> bool {
        self.view.inverted()
    }

    pub fn invert_colors(&self) -> bool {
        self.view.toggle_inverted()
    }

    fn geometry(&self, page: usize, rotated: bool) -> Result<(f32, f32), InvalidPageIndex> {
        let (_, record) = self.record(page)?;
        if rotated && self.view.rotation().is_sideways() {
            Ok((record.height(), record.width()))
        } else {
            Ok((record.width(), record.height()))
        }
    }

    pub fn page_width(&self, page: usize, rotated: bool) -> Result<f32, InvalidPageIndex> {
        self.geometry(page, rotated).map(|(width, _)| width)
    }

    pub fn page_height(&self, page: usize, rotated: bool) -> Result<f32, InvalidPageIndex> {
        self.geometry(page, rotated).map(|(_, height)| height)
    }

    /// Width over height; 0 for pages without usable geometry.
    pub fn page_aspect(&self, page: usize, rotated: bool) -> Result<f32, InvalidPageIndex> {
        let (width, height) = self.geometry(page, rotated)?;
        Ok(if height > 0.0 { width / height } else { 0.0 })
    }

    pub fn min_aspect(&self, rotated: bool) -> f32 {
        let Some(loaded) = self.loaded.as_ref() else {
            return 1.0;
        };
        let document = &loaded.document;
        if rotated && self.view.rotation().is_sideways() {
            1.0 / document.max_aspect
        } else {
            document.min_aspect
        }
    }

    pub fn max_aspect(&self, rotated: bool) -> f32 {
        let Some(loaded) = self.loaded.as_ref() else {
            return 1.0;
        };
        let document = &loaded.document;
        if rotated && self.view.rotation().is_sideways() {
            1.0 / document.min_aspect
        } else {
            document.max_aspect
        }
    }

    /// Links of `page`, or `None` until the worker has rendered it once.
    pub fn get_links(&self, page: usize) -> Result<Option<Arc<Vec<LinkTarget>>>, InvalidPageIndex> {
        let (_, record) = self.record(page)?;
        Ok(record.with_content(|content| content.links().cloned()))
    }

    /// Text regions of `page`, or `None` until the worker has rendered it once.
    pub fn get_text(&self, page: usize) -> Result<Option<Arc<Vec<TextRegion>>>, InvalidPageIndex> {
        let (_, record) = self.record(page)?;
        Ok(record.with_content(|content| content.text().cloned()))
    }

    pub fn get_toc(&self) -> Option<Vec<OutlineItem>> {
        self.loaded
            .as_ref()
            .and_then(|loaded| loaded.document.decoder.table_of_contents())
    }

    pub fn resolve_link(&self, name: &str) -> Option<Destination> {
        self.loaded
            .as_ref()
            .and_then(|loaded| loaded.document.decoder.resolve_named_destination(name))
    }

    pub fn jump_store(&mut self, page: usize) {
        self.jumps.store(page);
    }

    /// Previous page in the jump history. `current_page` is recorded first
    /// when leaving the end of the history.
    pub fn jump_back(&mut self, current_page: usize) -> Option<usize> {
        self.jumps.back(current_page)
    }

    pub fn jump_forward(&mut self) -> Option<usize> {
        self.jumps.forward()
    }

    pub fn clear_jumps(&mut self) {
        self.jumps.clear();
    }

    pub fn jumps(&self) -> &JumpHistory {
        &self.jumps
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        self.close();
    }
}
