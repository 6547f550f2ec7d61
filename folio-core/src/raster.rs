use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::Rotation;

/// Decoded RGBA pixels of one page.
pub type Raster = RgbaImage;

/// Reduced-contrast color inversion used for "night mode" rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InversionStyle {
    /// Fraction of the full value range kept after inverting.
    pub contrast: f32,
    /// Constant lift added to every inverted channel, as a fraction of 255.
    pub brightening: f32,
}

impl Default for InversionStyle {
    fn default() -> Self {
        Self {
            contrast: 0.5,
            brightening: 0.15,
        }
    }
}

impl InversionStyle {
    fn map(&self, value: u8) -> u8 {
        let inverted = f32::from(255 - value);
        let mapped = inverted * self.contrast + 255.0 * self.brightening;
        mapped.round().clamp(0.0, 255.0) as u8
    }

    pub fn invert(&self, source: &Raster) -> Raster {
        let mut lut = [0u8; 256];
        for (value, slot) in lut.iter_mut().enumerate() {
            *slot = self.map(value as u8);
        }

        let mut out = source.clone();
        for chunk in out.as_mut().chunks_exact_mut(4) {
            chunk[0] = lut[usize::from(chunk[0])];
            chunk[1] = lut[usize::from(chunk[1])];
            chunk[2] = lut[usize::from(chunk[2])];
        }
        out
    }
}

/// Scale `source` to a `size`x`size` square and undo `rotation`, so that
/// thumbnails are always upright.
pub(crate) fn thumbnail(source: &Raster, size: u32, smooth: bool, rotation: Rotation) -> Raster {
    let filter = if smooth {
        FilterType::Triangle
    } else {
        FilterType::Nearest
    };
    let size = size.max(1);
    let scaled = imageops::resize(source, size, size, filter);
    match rotation.quarter_turns() {
        1 => imageops::rotate270(&scaled),
        2 => imageops::rotate180(&scaled),
        3 => imageops::rotate90(&scaled),
        _ => scaled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn full_contrast_inversion_flips_channels_and_keeps_alpha() {
        let style = InversionStyle {
            contrast: 1.0,
            brightening: 0.0,
        };
        let source = RgbaImage::from_pixel(2, 1, Rgba([0, 128, 255, 77]));
        let inverted = style.invert(&source);
        assert_eq!(inverted.get_pixel(0, 0), &Rgba([255, 127, 0, 77]));
        assert_eq!(style.invert(&inverted), source);
    }

    #[test]
    fn default_inversion_reduces_contrast() {
        let style = InversionStyle::default();
        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let black = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let from_white = style.invert(&white).get_pixel(0, 0)[0];
        let from_black = style.invert(&black).get_pixel(0, 0)[0];
        assert_eq!(from_white, 38);
        assert_eq!(from_black, 166);
    }

    #[test]
    fn thumbnail_is_square_and_upright() {
        let mut source = RgbaImage::from_pixel(40, 20, Rgba([255, 255, 255, 255]));
        for y in 0..10 {
            for x in 0..20 {
                source.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }

        let thumb = thumbnail(&source, 8, false, Rotation::NONE);
        assert_eq!(thumb.dimensions(), (8, 8));
        assert_eq!(thumb.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));

        // A raster rendered at a quarter turn has its top-left quadrant at the
        // top-right; the thumbnail rotates it back.
        let rotated = imageops::rotate90(&source);
        let thumb = thumbnail(&rotated, 8, false, Rotation::from_quarter_turns(1));
        assert_eq!(thumb.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn thumbnail_size_is_at_least_one_pixel() {
        let source = RgbaImage::new(4, 4);
        assert_eq!(thumbnail(&source, 0, true, Rotation::NONE).dimensions(), (1, 1));
    }
}
