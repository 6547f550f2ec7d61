//! Document backends for `folio-core`.

mod geometry;
#[cfg(feature = "pdf")]
mod pdfium;

pub use geometry::normalize_rect;
#[cfg(feature = "pdf")]
pub use pdfium::PdfiumOpener;

/// Environment variable naming the pdfium shared library to bind at runtime.
pub const PDFIUM_LIBRARY_ENV: &str = "FOLIO_PDFIUM_LIBRARY_PATH";
