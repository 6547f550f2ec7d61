use folio_core::{NormalizedRect, Rotation};

/// Convert a rectangle in PDF user space (bottom-left origin, points) into
/// page-relative coordinates with a top-left origin. Returns `None` for
/// empty rectangles or pages without usable geometry.
pub fn normalize_rect(
    page_width: f32,
    page_height: f32,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
) -> Option<NormalizedRect> {
    if page_width <= 0.0 || page_height <= 0.0 {
        return None;
    }
    let rect = NormalizedRect {
        left: left / page_width,
        top: 1.0 - top / page_height,
        right: right / page_width,
        bottom: 1.0 - bottom / page_height,
    }
    .clamp();
    rect.is_valid().then_some(rect)
}

/// Unrotated page edge that ends up horizontal in the output bitmap.
///
/// pdfium scales against the unrotated page, so a quarter turn has to
/// constrain the page height to get the requested output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
pub(crate) enum ScaledEdge {
    Width,
    Height,
}

#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
pub(crate) fn scaled_edge(rotation: Rotation) -> ScaledEdge {
    if rotation.is_sideways() {
        ScaledEdge::Height
    } else {
        ScaledEdge::Width
    }
}

/// Bitmap size pdfium produces for a page of `page_width` x `page_height`
/// points when the edge from [`scaled_edge`] is set to `target_width`.
#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
pub(crate) fn output_size(
    page_width: f32,
    page_height: f32,
    target_width: u32,
    rotation: Rotation,
) -> (u32, u32) {
    let edge = match scaled_edge(rotation) {
        ScaledEdge::Width => page_width,
        ScaledEdge::Height => page_height,
    };
    if edge <= 0.0 {
        return (0, 0);
    }
    let scale = target_width as f32 / edge;
    let scaled_width = (page_width * scale).round() as u32;
    let scaled_height = (page_height * scale).round() as u32;
    if rotation.is_sideways() {
        (scaled_height, scaled_width)
    } else {
        (scaled_width, scaled_height)
    }
}
