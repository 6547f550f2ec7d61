use std::env;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use folio_core::{
    DecodeError, Destination, DocumentOpener, LinkAction, LinkTarget, OpenError, OutlineItem,
    PageDecoder, Raster, Rotation, TextRegion,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, trace, warn};

use crate::geometry::{normalize_rect, output_size, scaled_edge, ScaledEdge};
use crate::PDFIUM_LIBRARY_ENV;

/// Opens PDF files through a pdfium library bound at runtime.
pub struct PdfiumOpener {
    pdfium: Arc<Pdfium>,
}

impl PdfiumOpener {
    /// Bind pdfium from `FOLIO_PDFIUM_LIBRARY_PATH`, then the working
    /// directory, then the system library path.
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl DocumentOpener for PdfiumOpener {
    #[instrument(skip(self, password))]
    fn open(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Arc<dyn PageDecoder>, OpenError> {
        if !path.is_file() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }
        let document = self
            .pdfium
            .load_pdf_from_file(path, password)
            .map_err(open_error)?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`.
        // PdfiumDecoder keeps its own Arc to that Pdfium and declares the
        // document field first, so the document is dropped before the
        // bindings it refers to.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        debug!(page_count, "loaded pdf");

        Ok(Arc::new(PdfiumDecoder {
            document: Mutex::new(document),
            page_count,
            _pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

fn open_error(err: PdfiumError) -> OpenError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            OpenError::PasswordRequired
        }
        other => OpenError::Corrupt {
            reason: other.to_string(),
        },
    }
}

struct PdfiumDecoder {
    document: Mutex<PdfDocument<'static>>,
    page_count: usize,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDecoder {
    fn with_page<R>(
        &self,
        page: usize,
        f: impl FnOnce(&PdfPage<'_>) -> Result<R, PdfiumError>,
    ) -> Result<R, DecodeError> {
        let index: PdfPageIndex = page
            .try_into()
            .map_err(|_| DecodeError::transient(page, "page index out of supported range"))?;
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(index)
            .map_err(|err| DecodeError::transient(page, err.to_string()))?;
        f(&pdf_page).map_err(|err| DecodeError::transient(page, err.to_string()))
    }
}

impl PageDecoder for PdfiumDecoder {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, page: usize) -> Result<(f32, f32), DecodeError> {
        self.with_page(page, |pdf_page| Ok((pdf_page.width().value, pdf_page.height().value)))
    }

    #[instrument(skip(self))]
    fn decode(
        &self,
        page: usize,
        target_width: u32,
        rotation: Rotation,
    ) -> Result<Raster, DecodeError> {
        let target = i32::try_from(target_width)
            .map_err(|_| DecodeError::transient(page, "target width too large"))?
            .max(1);
        let config = PdfRenderConfig::new();
        let config = match scaled_edge(rotation) {
            ScaledEdge::Width => config.set_target_width(target),
            ScaledEdge::Height => config.set_target_height(target),
        }
        .rotate(render_rotation(rotation), false);

        let (width, height, pixels, expected) = self.with_page(page, |pdf_page| {
            let expected = output_size(
                pdf_page.width().value,
                pdf_page.height().value,
                target_width,
                rotation,
            );
            let bitmap = pdf_page.render_with_config(&config)?;
            let image = bitmap.as_image().to_rgba8();
            Ok((image.width(), image.height(), image.into_raw(), expected))
        })?;
        if (width, height) != expected {
            debug!(page, width, height, ?expected, "bitmap size differs from page geometry");
        }
        Raster::from_raw(width, height, pixels)
            .ok_or_else(|| DecodeError::transient(page, "bitmap size mismatch"))
    }

    fn extract_links(&self, page: usize) -> Result<Vec<LinkTarget>, DecodeError> {
        self.with_page(page, |pdf_page| {
            let page_width = pdf_page.width().value;
            let page_height = pdf_page.height().value;

            let mut targets = Vec::new();
            for link in pdf_page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(?err, page, "failed to resolve link rectangle");
                        continue;
                    }
                };
                let Some(area) = normalize_rect(
                    page_width,
                    page_height,
                    rect.left().value,
                    rect.top().value,
                    rect.right().value,
                    rect.bottom().value,
                ) else {
                    continue;
                };
                let Some(action) = link_action(&link) else {
                    continue;
                };
                targets.push(LinkTarget { area, action });
            }
            Ok(targets)
        })
    }

    fn extract_text_regions(&self, page: usize) -> Result<Vec<TextRegion>, DecodeError> {
        self.with_page(page, |pdf_page| {
            let page_width = pdf_page.width().value;
            let page_height = pdf_page.height().value;
            let text = pdf_page.text()?;

            let mut regions = Vec::new();
            for segment in text.segments().iter() {
                let content = segment.text();
                if content.trim().is_empty() {
                    continue;
                }
                let bounds = segment.bounds();
                if let Some(area) = normalize_rect(
                    page_width,
                    page_height,
                    bounds.left().value,
                    bounds.top().value,
                    bounds.right().value,
                    bounds.bottom().value,
                ) {
                    regions.push(TextRegion {
                        area,
                        text: content,
                    });
                }
            }
            Ok(regions)
        })
    }

    fn table_of_contents(&self) -> Option<Vec<OutlineItem>> {
        let document = self.document.lock();
        let bookmarks = document.bookmarks();
        let root = bookmarks.root()?;
        let mut outline = Vec::new();
        collect_outline(root, &mut outline);
        Some(outline)
    }

    fn resolve_named_destination(&self, name: &str) -> Option<Destination> {
        // pdfium-render exposes no lookup of the document's name tree.
        trace!(name, "named destinations are not supported by this backend");
        None
    }
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation.quarter_turns() {
        1 => PdfPageRenderRotation::Degrees90,
        2 => PdfPageRenderRotation::Degrees180,
        3 => PdfPageRenderRotation::Degrees270,
        _ => PdfPageRenderRotation::None,
    }
}

fn link_action(link: &PdfLink<'_>) -> Option<LinkAction> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                let page = action
                    .as_local_destination_action()
                    .and_then(|local| local.destination().ok())
                    .and_then(|destination| destination.page_index().ok());
                if let Some(page) = page {
                    return Some(LinkAction::GoTo {
                        page: usize::from(page),
                    });
                }
            }
            PdfActionType::Uri => {
                let uri = action
                    .as_uri_action()
                    .and_then(|uri_action| uri_action.uri().ok());
                if let Some(uri) = uri.filter(|uri| !uri.is_empty()) {
                    return Some(LinkAction::Uri { uri });
                }
            }
            _ => {}
        }
    }

    link.destination()
        .and_then(|destination| destination.page_index().ok())
        .map(|page| LinkAction::GoTo {
            page: usize::from(page),
        })
}

/// Flatten the bookmark tree depth-first. Bookmarks without a title or a
/// page destination are skipped but their children are kept.
fn collect_outline(root: PdfBookmark<'_>, out: &mut Vec<OutlineItem>) {
    let mut pending = vec![(root, 0usize)];
    while let Some((bookmark, depth)) = pending.pop() {
        if let Some(sibling) = bookmark.next_sibling() {
            pending.push((sibling, depth));
        }
        if let Some(child) = bookmark.first_child() {
            pending.push((child, depth + 1));
        }

        let page_index = bookmark
            .destination()
            .and_then(|destination| destination.page_index().ok());
        match (bookmark.title(), page_index) {
            (Some(title), Some(page_index)) => out.push(OutlineItem {
                title,
                page_index: usize::from(page_index),
                depth,
            }),
            _ => trace!(depth, "skipping outline entry without a page target"),
        }
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = env::var(PDFIUM_LIBRARY_ENV).ok().filter(|path| !path.is_empty())?;
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(%path, %err, "failed to load pdfium from {PDFIUM_LIBRARY_ENV}");
            None
        }
    }
}

/// Try the working directory, then the system search path.
fn bind_pdfium_default() -> Result<Pdfium> {
    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    let local_label = local.display().to_string();
    type Bind<'a> = &'a dyn Fn() -> Result<Box<dyn PdfiumLibraryBindings>, PdfiumError>;
    let attempts: [(&str, Bind<'_>); 2] = [
        (local_label.as_str(), &|| Pdfium::bind_to_library(&local)),
        ("system library path", &Pdfium::bind_to_system_library),
    ];

    let mut failures = Vec::new();
    for (source, bind) in attempts {
        match bind() {
            Ok(bindings) => {
                debug!(source, "bound pdfium");
                return Ok(Pdfium::new(bindings));
            }
            Err(err) => failures.push(format!("{source}: {err}")),
        }
    }
    Err(anyhow!(
        "no usable pdfium library found (tried {}); point {PDFIUM_LIBRARY_ENV} at one",
        failures.join("; ")
    ))
}
