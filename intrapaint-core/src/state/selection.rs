//! The selection mask. One per document, sized to the document, never deleted.
//!
//! Mask operations here are pure: they return the new mask and leave applying it (and recording the
//! change) to the image stack.

use crate::raster;
use crate::util::{Anchor, Rect, Size};
use image::{GrayImage, Luma};

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Default,
    strum::AsRefStr,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum SelectionMode {
    #[default]
    Replace,
    Add,
    Subtract,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Rectangle(Rect),
    /// Ellipse inscribed in the rectangle.
    Ellipse(Rect),
}
impl Shape {
    #[must_use]
    pub fn bounds(&self) -> Rect {
        match self {
            Self::Rectangle(rect) | Self::Ellipse(rect) => *rect,
        }
    }
    fn contains(&self, x: i32, y: i32) -> bool {
        match self {
            Self::Rectangle(rect) => rect.contains(crate::util::Point::new(x, y)),
            Self::Ellipse(rect) => {
                if rect.is_empty() {
                    return false;
                }
                let rx = rect.width as f32 / 2.0;
                let ry = rect.height as f32 / 2.0;
                let dx = (x as f32 + 0.5 - rect.x as f32 - rx) / rx;
                let dy = (y as f32 + 0.5 - rect.y as f32 - ry) / ry;
                dx * dx + dy * dy <= 1.0
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectionLayer {
    mask: GrayImage,
}
impl SelectionLayer {
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self {
            mask: GrayImage::new(size.width, size.height),
        }
    }
    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }
    #[must_use]
    pub fn size(&self) -> Size {
        raster::size_of(&self.mask)
    }
    /// Swap in a new mask, returning the old one. Sizes must match.
    pub(crate) fn replace(&mut self, mask: GrayImage) -> GrayImage {
        std::mem::replace(&mut self.mask, mask)
    }
    /// Tightest rectangle around non-zero coverage.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        raster::mask_bounds(&self.mask)
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p[0] == 0)
    }
    /// Coverage at a document pixel, 0 outside the document.
    #[must_use]
    pub fn coverage(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x as u32 >= self.mask.width() || y as u32 >= self.mask.height() {
            0
        } else {
            self.mask.get_pixel(x as u32, y as u32)[0]
        }
    }
    /// The area a generation should cover: selection bounds grown by `padding`, then moved and shrunk
    /// to fit the document.
    #[must_use]
    pub fn generation_area(&self, padding: u32) -> Option<Rect> {
        let bounds = self.bounds()?;
        let document = Rect::from_size(self.size());
        Some(
            bounds
                .padded(padding.min(i32::MAX as u32) as i32)
                .clamped_into(&document),
        )
    }

    #[must_use]
    pub fn all(size: Size) -> GrayImage {
        GrayImage::from_pixel(size.width, size.height, Luma([255]))
    }
    #[must_use]
    pub fn inverted(&self) -> GrayImage {
        let mut mask = self.mask.clone();
        for pixel in mask.pixels_mut() {
            pixel[0] = 255 - pixel[0];
        }
        mask
    }
    /// Combine a shape with the current mask.
    #[must_use]
    pub fn with_shape(&self, shape: Shape, mode: SelectionMode) -> GrayImage {
        let mut mask = match mode {
            SelectionMode::Replace => GrayImage::new(self.mask.width(), self.mask.height()),
            SelectionMode::Add | SelectionMode::Subtract => self.mask.clone(),
        };
        let value = match mode {
            SelectionMode::Replace | SelectionMode::Add => 255,
            SelectionMode::Subtract => 0,
        };
        let Some(area) = shape.bounds().intersection(&Rect::from_size(self.size())) else {
            return mask;
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                if shape.contains(x, y) {
                    mask.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
        mask
    }
    /// The mask reallocated for a resized document.
    #[must_use]
    pub fn resized(&self, size: Size, anchor: Anchor) -> GrayImage {
        raster::resize_canvas(&self.mask, size, anchor)
    }
}
