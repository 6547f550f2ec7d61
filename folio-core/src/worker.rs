use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::queue::{RenderRequest, Wake};
use crate::raster::{self, InversionStyle, Raster};
use crate::store::{Document, Observers, ViewState};

/// Lifecycle of the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Waiting = 0,
    Dequeueing = 1,
    Decoding = 2,
    Finalizing = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Waiting,
            1 => WorkerState::Dequeueing,
            2 => WorkerState::Decoding,
            3 => WorkerState::Finalizing,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RenderSettings {
    thumbnail_size: u32,
    smooth_thumbnails: bool,
    inversion: InversionStyle,
}

impl From<&Config> for RenderSettings {
    fn from(config: &Config) -> Self {
        Self {
            thumbnail_size: config.thumbnail_size,
            smooth_thumbnails: config.thumbnail_filter,
            inversion: config.inversion(),
        }
    }
}

/// Handle to the single thread that renders queued requests of one document.
///
/// The document's decoder is only ever driven from this thread.
pub struct RenderWorker {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    document: Arc<Document>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    pub(crate) fn spawn(
        document: Arc<Document>,
        view: Arc<ViewState>,
        observers: Arc<Observers>,
        config: &Config,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(WorkerState::Waiting as u8));
        let render_loop = RenderLoop {
            document: Arc::clone(&document),
            view,
            observers,
            stop: Arc::clone(&stop),
            state: Arc::clone(&state),
            settings: RenderSettings::from(config),
        };
        let handle = thread::Builder::new()
            .name("folio-render".into())
            .spawn(move || render_loop.run())?;
        Ok(Self {
            stop,
            state,
            document,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the thread to stop and wait for it. Any decode in flight runs to
    /// completion first.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.document.queue.interrupt();
        if handle.join().is_err() {
            warn!("render thread panicked");
        }
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RenderLoop {
    document: Arc<Document>,
    view: Arc<ViewState>,
    observers: Arc<Observers>,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    settings: RenderSettings,
}

/// What the worker has to do for a request, decided under the record lock.
enum Plan {
    Decode,
    /// The slot already holds this decode; only the inverted copy is missing.
    Invert(Arc<Raster>),
}

impl RenderLoop {
    fn enter(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn run(self) {
        loop {
            self.enter(WorkerState::Waiting);
            let wake = self.document.queue.wait_next();
            self.enter(WorkerState::Dequeueing);
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match wake {
                Wake::Work(request) => self.render(request),
                Wake::Interrupted => continue,
            }
        }
        self.enter(WorkerState::Stopped);
        debug!("render worker stopped");
    }

    fn render(&self, request: RenderRequest) {
        let RenderRequest { page, slot, width } = request;
        let Some(record) = self.document.pages.get(page) else {
            warn!(page, "render request for a page outside the document");
            return;
        };

        let rotation = self.view.rotation();
        let inverted = self.view.inverted();
        let (plan, wants_inverted, needs_thumbnail) = record.with_content(|content| {
            content.sync_inversion(inverted);
            if content.is_current(slot, width, rotation) {
                return (None, false, false);
            }
            let plan = if content.has_source(slot, width, rotation) {
                content.plain_raster(slot).cloned().map(Plan::Invert)
            } else {
                Some(Plan::Decode)
            };
            (plan, content.is_inverted(), !content.has_thumbnail())
        });
        let Some(plan) = plan else {
            trace!(page, ?slot, width, "request already satisfied");
            return;
        };

        self.enter(WorkerState::Decoding);
        let started = Instant::now();
        let (plain, decoded) = match plan {
            Plan::Invert(plain) => (plain, false),
            Plan::Decode => match self.document.decoder.decode(page, width, rotation) {
                Ok(raster) => (Arc::new(raster), true),
                Err(err) => {
                    warn!(%err, page, ?slot, width, "dropping render request");
                    return;
                }
            },
        };

        self.enter(WorkerState::Finalizing);
        let inverted_copy =
            wants_inverted.then(|| Arc::new(self.settings.inversion.invert(&plain)));
        let thumbnails = needs_thumbnail.then(|| {
            let thumb = raster::thumbnail(
                &plain,
                self.settings.thumbnail_size,
                self.settings.smooth_thumbnails,
                rotation,
            );
            let inverted_thumb = self.settings.inversion.invert(&thumb);
            (thumb, inverted_thumb)
        });

        record.with_content(|content| {
            if decoded {
                content.install(slot, Arc::clone(&plain), inverted_copy, width, rotation);
            } else if let Some(copy) = inverted_copy {
                content.attach_inverted(slot, &plain, copy);
            }
            if let Some((thumb, inverted_thumb)) = thumbnails {
                if !content.has_thumbnail() {
                    content.set_thumbnails(thumb, inverted_thumb);
                }
            }
        });
        debug!(
            page,
            ?slot,
            width,
            rotation = rotation.quarter_turns(),
            decoded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered page"
        );

        self.extract_metadata(page);
        self.document.gc.track(slot, page);
        self.observers.notify(page);
    }

    /// Fill in links and text once per page. The record lock is not held
    /// while the decoder extracts.
    fn extract_metadata(&self, page: usize) {
        let Some(record) = self.document.pages.get(page) else {
            return;
        };
        let (needs_links, needs_text) =
            record.with_content(|content| (content.links().is_none(), content.text().is_none()));

        if needs_links {
            let links = self.document.decoder.extract_links(page).unwrap_or_else(|err| {
                warn!(%err, page, "failed to extract links");
                Vec::new()
            });
            record.with_content(|content| content.set_links(links));
        }
        if needs_text {
            let text = self
                .document
                .decoder
                .extract_text_regions(page)
                .unwrap_or_else(|err| {
                    warn!(%err, page, "failed to extract text");
                    Vec::new()
                });
            record.with_content(|content| content.set_text(text));
        }
    }
}
