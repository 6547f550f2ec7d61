use std::sync::Arc;

use parking_lot::Mutex;

use crate::decoder::{LinkTarget, TextRegion};
use crate::raster::Raster;
use crate::{Rotation, Slot, SLOT_COUNT};

/// Cached renderings of one slot.
///
/// `plain` is what the decoder produced; `inverted` is derived from it by the
/// worker once inversion is requested. `width == 0` means "not rendered".
#[derive(Debug, Default, Clone)]
pub(crate) struct SlotContent {
    plain: Option<Arc<Raster>>,
    inverted: Option<Arc<Raster>>,
    width: u32,
    rotation: Rotation,
}

impl SlotContent {
    fn variant(&self, inverted: bool) -> Option<&Arc<Raster>> {
        if inverted {
            self.inverted.as_ref()
        } else {
            self.plain.as_ref()
        }
    }
}

/// Mutable state of a page, only reachable through [`PageRecord::with_content`].
#[derive(Debug, Default)]
pub(crate) struct PageContent {
    slots: [SlotContent; SLOT_COUNT],
    thumbnail: Option<Arc<Raster>>,
    thumbnail_inverted: Option<Arc<Raster>>,
    inverted: bool,
    links: Option<Arc<Vec<LinkTarget>>>,
    text: Option<Arc<Vec<TextRegion>>>,
}

impl PageContent {
    /// Make the displayed variant agree with `inverted`. Returns whether a
    /// swap happened.
    pub(crate) fn sync_inversion(&mut self, inverted: bool) -> bool {
        if self.inverted == inverted {
            return false;
        }
        self.inverted = inverted;
        true
    }

    pub(crate) fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub(crate) fn displayed(&self, slot: Slot) -> Option<&Arc<Raster>> {
        self.slots[slot.index()].variant(self.inverted)
    }

    /// Width the displayed raster of `slot` was rendered at, 0 if there is none.
    pub(crate) fn rendered_width(&self, slot: Slot) -> u32 {
        match self.displayed(slot) {
            Some(_) => self.slots[slot.index()].width,
            None => 0,
        }
    }

    pub(crate) fn rendered_rotation(&self, slot: Slot) -> Rotation {
        self.slots[slot.index()].rotation
    }

    /// The displayed raster of `slot` exists and matches `width`/`rotation`.
    pub(crate) fn is_current(&self, slot: Slot, width: u32, rotation: Rotation) -> bool {
        let content = &self.slots[slot.index()];
        content.variant(self.inverted).is_some()
            && content.width == width
            && content.rotation == rotation
    }

    /// The slot holds a decoded raster of this geometry, regardless of which
    /// color variant is displayed.
    pub(crate) fn has_source(&self, slot: Slot, width: u32, rotation: Rotation) -> bool {
        let content = &self.slots[slot.index()];
        content.plain.is_some() && content.width == width && content.rotation == rotation
    }

    pub(crate) fn has_raster(&self, slot: Slot) -> bool {
        let content = &self.slots[slot.index()];
        content.plain.is_some() || content.inverted.is_some()
    }

    /// Replace `slot` with a fresh decode. `inverted` may carry the derived
    /// inverted copy when the record is displaying inverted colors.
    pub(crate) fn install(
        &mut self,
        slot: Slot,
        plain: Arc<Raster>,
        inverted: Option<Arc<Raster>>,
        width: u32,
        rotation: Rotation,
    ) {
        self.slots[slot.index()] = SlotContent {
            plain: Some(plain),
            inverted,
            width,
            rotation,
        };
    }

    /// Attach an inverted copy of `source`, provided `slot` still holds that
    /// exact decode.
    pub(crate) fn attach_inverted(
        &mut self,
        slot: Slot,
        source: &Arc<Raster>,
        inverted: Arc<Raster>,
    ) -> bool {
        let content = &mut self.slots[slot.index()];
        match content.plain.as_ref() {
            Some(plain) if Arc::ptr_eq(plain, source) => {
                content.inverted = Some(inverted);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear_slot(&mut self, slot: Slot) {
        self.slots[slot.index()] = SlotContent::default();
    }

    pub(crate) fn has_thumbnail(&self) -> bool {
        self.thumbnail.is_some()
    }

    pub(crate) fn set_thumbnails(&mut self, plain: Raster, inverted: Raster) {
        self.thumbnail = Some(Arc::new(plain));
        self.thumbnail_inverted = Some(Arc::new(inverted));
    }

    pub(crate) fn plain_raster(&self, slot: Slot) -> Option<&Arc<Raster>> {
        self.slots[slot.index()].plain.as_ref()
    }

    fn displayed_thumbnail(&self) -> Option<&Arc<Raster>> {
        if self.inverted {
            self.thumbnail_inverted.as_ref()
        } else {
            self.thumbnail.as_ref()
        }
    }

    pub(crate) fn links(&self) -> Option<&Arc<Vec<LinkTarget>>> {
        self.links.as_ref()
    }

    pub(crate) fn set_links(&mut self, links: Vec<LinkTarget>) {
        if self.links.is_none() {
            self.links = Some(Arc::new(links));
        }
    }

    pub(crate) fn text(&self) -> Option<&Arc<Vec<TextRegion>>> {
        self.text.as_ref()
    }

    pub(crate) fn set_text(&mut self, text: Vec<TextRegion>) {
        if self.text.is_none() {
            self.text = Some(Arc::new(text));
        }
    }
}

/// Where the image of a [`PageView`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    Slot(Slot),
    Thumbnail,
}

/// Snapshot of what is cached for a page, detached from the record lock.
#[derive(Debug, Clone)]
pub struct PageView {
    pub page: usize,
    /// Best available image: the requested slot, the other slots, then the
    /// thumbnail.
    pub image: Option<Arc<Raster>>,
    pub source: Option<ViewSource>,
    /// Width of the requested slot's raster, 0 when that slot is not rendered.
    pub rendered_width: u32,
    /// Rotation of `image`; thumbnails are always upright.
    pub rotation: Rotation,
    pub inverted: bool,
    pub width: f32,
    pub height: f32,
}

impl PageView {
    /// The requested slot is rendered at `width` and `rotation`.
    pub fn is_current(&self, slot: Slot, width: u32, rotation: Rotation) -> bool {
        self.source == Some(ViewSource::Slot(slot))
            && self.rendered_width == width
            && self.rotation == rotation
    }
}

/// Per-page cache entry shared by the UI thread and the render worker.
#[derive(Debug)]
pub struct PageRecord {
    width: f32,
    height: f32,
    content: Mutex<PageContent>,
}

impl PageRecord {
    pub(crate) fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            content: Mutex::new(PageContent::default()),
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Run `f` with the record locked. The lock is released when `f` returns;
    /// nothing borrowed from the content may escape.
    pub(crate) fn with_content<R>(&self, f: impl FnOnce(&mut PageContent) -> R) -> R {
        let mut guard = self.content.lock();
        f(&mut *guard)
    }

    pub(crate) fn snapshot(&self, page: usize, slot: Slot, content: &PageContent) -> PageView {
        let mut view = PageView {
            page,
            image: None,
            source: None,
            rendered_width: content.rendered_width(slot),
            rotation: Rotation::NONE,
            inverted: content.inverted,
            width: self.width,
            height: self.height,
        };

        for candidate in slot.fallback_order() {
            if let Some(image) = content.displayed(candidate) {
                view.image = Some(Arc::clone(image));
                view.source = Some(ViewSource::Slot(candidate));
                view.rotation = content.rendered_rotation(candidate);
                return view;
            }
        }

        if let Some(thumbnail) = content.displayed_thumbnail() {
            view.image = Some(Arc::clone(thumbnail));
            view.source = Some(ViewSource::Thumbnail);
        }
        view
    }
}
