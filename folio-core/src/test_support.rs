use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::decoder::{
    Destination, DocumentOpener, LinkAction, LinkTarget, NormalizedRect, OutlineItem,
    PageDecoder, TextRegion,
};
use crate::error::{DecodeError, OpenError};
use crate::raster::Raster;
use crate::store::PageReady;
use crate::Rotation;

const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type DecodeCall = (usize, u32, Rotation);

/// In-memory document of 100x150 pages that records what it was asked to do.
pub(crate) struct FakeDecoder {
    page_count: usize,
    broken_geometry: BTreeSet<usize>,
    failing: BTreeSet<usize>,
    gate: Option<Receiver<()>>,
    calls: Mutex<Vec<DecodeCall>>,
    extractions: AtomicUsize,
}

impl FakeDecoder {
    pub(crate) fn new(page_count: usize) -> Self {
        Self {
            page_count,
            broken_geometry: BTreeSet::new(),
            failing: BTreeSet::new(),
            gate: None,
            calls: Mutex::new(Vec::new()),
            extractions: AtomicUsize::new(0),
        }
    }

    /// Every decode blocks until a token is sent on the returned channel.
    pub(crate) fn gated(page_count: usize) -> (Self, Sender<()>) {
        let (tx, rx) = flume::unbounded();
        let mut decoder = Self::new(page_count);
        decoder.gate = Some(rx);
        (decoder, tx)
    }

    pub(crate) fn failing_on(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    pub(crate) fn with_broken_geometry(mut self, page: usize) -> Self {
        self.broken_geometry.insert(page);
        self
    }

    pub(crate) fn decode_calls(&self) -> Vec<DecodeCall> {
        self.calls.lock().clone()
    }

    /// Links and text extractions combined.
    pub(crate) fn extraction_calls(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_until_decoding(&self) {
        let deadline = Instant::now() + TIMEOUT;
        while self.calls.lock().is_empty() {
            assert!(Instant::now() < deadline, "decoder was never called");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn check(&self, page: usize) -> Result<(), DecodeError> {
        if page < self.page_count {
            Ok(())
        } else {
            Err(DecodeError::transient(page, "no such page"))
        }
    }
}

impl PageDecoder for FakeDecoder {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, page: usize) -> Result<(f32, f32), DecodeError> {
        self.check(page)?;
        if self.broken_geometry.contains(&page) {
            return Err(DecodeError::transient(page, "unreadable media box"));
        }
        Ok((100.0, 150.0))
    }

    fn decode(
        &self,
        page: usize,
        target_width: u32,
        rotation: Rotation,
    ) -> Result<Raster, DecodeError> {
        self.calls.lock().push((page, target_width, rotation));
        if let Some(gate) = &self.gate {
            // A dropped sender releases the decode.
            let _ = gate.recv();
        }
        self.check(page)?;
        if self.failing.contains(&page) {
            return Err(DecodeError::transient(page, "simulated failure"));
        }

        let (width, height) = if rotation.is_sideways() {
            (150.0, 100.0)
        } else {
            (100.0, 150.0)
        };
        let target_height = (target_width as f32 * height / width).round().max(1.0) as u32;
        let shade = (page % 25) as u8 * 10;
        Ok(RgbaImage::from_fn(target_width, target_height, |x, _| {
            if x < target_width / 2 {
                Rgba([shade, 200, 40, 255])
            } else {
                Rgba([250, shade, 120, 255])
            }
        }))
    }

    fn extract_links(&self, page: usize) -> Result<Vec<LinkTarget>, DecodeError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        self.check(page)?;
        Ok(vec![LinkTarget {
            area: NormalizedRect {
                left: 0.1,
                top: 0.9,
                right: 0.3,
                bottom: 0.95,
            },
            action: LinkAction::GoTo { page: page + 1 },
        }])
    }

    fn extract_text_regions(&self, page: usize) -> Result<Vec<TextRegion>, DecodeError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        self.check(page)?;
        Ok(vec![TextRegion {
            area: NormalizedRect {
                left: 0.1,
                top: 0.1,
                right: 0.9,
                bottom: 0.2,
            },
            text: format!("page {page}"),
        }])
    }

    fn table_of_contents(&self) -> Option<Vec<OutlineItem>> {
        let last = self.page_count.checked_sub(1)?;
        Some(vec![
            OutlineItem {
                title: "Start".into(),
                page_index: 0,
                depth: 0,
            },
            OutlineItem {
                title: "End".into(),
                page_index: last,
                depth: 1,
            },
        ])
    }

    fn resolve_named_destination(&self, name: &str) -> Option<Destination> {
        match name {
            "end" => Some(Destination {
                page: self.page_count.checked_sub(1)?,
                top: Some(0.0),
            }),
            _ => None,
        }
    }
}

/// Hands out the same decoder for every path except a few reserved names.
pub(crate) struct FakeOpener {
    decoder: Arc<FakeDecoder>,
}

impl FakeOpener {
    pub(crate) fn new(decoder: Arc<FakeDecoder>) -> Self {
        Self { decoder }
    }
}

impl DocumentOpener for FakeOpener {
    fn open(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Arc<dyn PageDecoder>, OpenError> {
        match path.file_name().and_then(|name| name.to_str()) {
            Some("missing.pdf") => Err(OpenError::NotFound(path.to_path_buf())),
            Some("corrupt.pdf") => Err(OpenError::Corrupt {
                reason: "bad xref table".into(),
            }),
            Some("locked.pdf") if password != Some("secret") => Err(OpenError::PasswordRequired),
            _ => Ok(Arc::clone(&self.decoder) as Arc<dyn PageDecoder>),
        }
    }
}

/// Wait until `page` is announced on `events`, skipping other pages.
pub(crate) fn wait_for_page(events: &Receiver<PageReady>, page: usize) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(ready) if ready.page == page => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}
