//! Page cache and background renderer for paginated documents.
//!
//! [`PageStore`] owns an open document, hands out whatever raster content is
//! cached for a page and schedules the rest on a single [`RenderWorker`]
//! thread. Rendering itself is delegated to a [`PageDecoder`].

mod config;
mod decoder;
mod error;
mod gc;
mod jump;
mod page;
mod queue;
mod raster;
mod store;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use serde::{Deserialize, Serialize};

pub use config::{Config, ConfigError};
pub use decoder::{
    Destination, DocumentOpener, LinkAction, LinkTarget, NormalizedRect, OutlineItem,
    PageDecoder, TextRegion,
};
pub use error::{DecodeError, InvalidPageIndex, OpenError};
pub use gc::GarbageCollector;
pub use jump::JumpHistory;
pub use page::{PageRecord, PageView, ViewSource};
pub use queue::{RenderRequest, Request, RequestQueue, Wake};
pub use raster::{InversionStyle, Raster};
pub use store::{PageReady, PageStore};
pub use worker::{RenderWorker, WorkerState};

/// Number of independent cache compartments per page.
pub const SLOT_COUNT: usize = 3;

/// One of the three per-page cache compartments.
///
/// Each slot can hold a rendering of the same page at a different width or
/// rotation, e.g. the main view and a presenter view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    Primary,
    Secondary,
    Tertiary,
}

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [Slot::Primary, Slot::Secondary, Slot::Tertiary];

    pub fn index(self) -> usize {
        match self {
            Slot::Primary => 0,
            Slot::Secondary => 1,
            Slot::Tertiary => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Slots in the order a cache lookup for `self` falls back through.
    pub(crate) fn fallback_order(self) -> [Slot; SLOT_COUNT] {
        let i = self.index();
        [
            self,
            Self::ALL[(i + 2) % SLOT_COUNT],
            Self::ALL[(i + 1) % SLOT_COUNT],
        ]
    }
}

/// Clockwise page rotation in quarter turns, always in `0..4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rotation(u8);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    pub fn from_quarter_turns(turns: i32) -> Self {
        Self(turns.rem_euclid(4) as u8)
    }

    pub fn quarter_turns(self) -> u8 {
        self.0
    }

    pub fn degrees(self) -> u16 {
        u16::from(self.0) * 90
    }

    /// Whether width and height trade places under this rotation.
    pub fn is_sideways(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn rotated_by(self, delta: i32) -> Self {
        Self::from_quarter_turns(i32::from(self.0) + delta.rem_euclid(4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_normalizes_negative_and_large_values() {
        assert_eq!(Rotation::from_quarter_turns(-1).quarter_turns(), 3);
        assert_eq!(Rotation::from_quarter_turns(9).quarter_turns(), 1);
        assert_eq!(Rotation::from_quarter_turns(-8), Rotation::NONE);
        assert_eq!(Rotation::from_quarter_turns(3).rotated_by(2).quarter_turns(), 1);
        assert_eq!(Rotation::NONE.rotated_by(-5).quarter_turns(), 3);
        assert_eq!(Rotation::from_quarter_turns(3).degrees(), 270);
    }

    #[test]
    fn slot_fallback_prefers_requested_slot_first() {
        assert_eq!(
            Slot::Primary.fallback_order(),
            [Slot::Primary, Slot::Tertiary, Slot::Secondary]
        );
        assert_eq!(
            Slot::Secondary.fallback_order(),
            [Slot::Secondary, Slot::Primary, Slot::Tertiary]
        );
        assert_eq!(Slot::from_index(3), None);
        assert_eq!(Slot::from_index(2), Some(Slot::Tertiary));
    }
}
