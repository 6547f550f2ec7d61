use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, OpenError};
use crate::raster::Raster;
use crate::Rotation;

/// Rectangle in page space, normalized to `0.0..=1.0` with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn clamp(self) -> Self {
        Self {
            left: self.left.clamp(0.0, 1.0),
            top: self.top.clamp(0.0, 1.0),
            right: self.right.clamp(0.0, 1.0),
            bottom: self.bottom.clamp(0.0, 1.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.right > self.left && self.bottom > self.top
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkAction {
    GoTo { page: usize },
    Uri { uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub area: NormalizedRect,
    pub action: LinkAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub area: NormalizedRect,
    pub text: String,
}

/// One entry of a flattened outline; `depth` encodes the tree structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineItem {
    pub title: String,
    pub page_index: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub page: usize,
    /// Vertical position inside the page, normalized with a top-left origin.
    pub top: Option<f32>,
}

/// Rasterizer and metadata source for one open document.
///
/// Implementations are not required to be reentrant: the store calls
/// `decode` and the extraction methods from its single render thread only.
pub trait PageDecoder: Send + Sync {
    fn page_count(&self) -> usize;
    /// Intrinsic size of `page` in document units.
    fn page_size(&self, page: usize) -> Result<(f32, f32), DecodeError>;
    /// Render `page` so that the output is `target_width` pixels wide after
    /// applying `rotation`.
    fn decode(
        &self,
        page: usize,
        target_width: u32,
        rotation: Rotation,
    ) -> Result<Raster, DecodeError>;
    fn extract_links(&self, page: usize) -> Result<Vec<LinkTarget>, DecodeError>;
    fn extract_text_regions(&self, page: usize) -> Result<Vec<TextRegion>, DecodeError>;
    fn table_of_contents(&self) -> Option<Vec<OutlineItem>>;
    fn resolve_named_destination(&self, name: &str) -> Option<Destination>;
}

pub trait DocumentOpener: Send + Sync {
    fn open(&self, path: &Path, password: Option<&str>)
        -> Result<Arc<dyn PageDecoder>, OpenError>;
}
