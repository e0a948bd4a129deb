//! Geometric primitives for layout and recognition.
//!
//! Region and word positions throughout the pipeline are axis-aligned
//! rectangles in the working image's pixel coordinate system.

use imageproc::contours::Contour;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl BoundingBox {
    /// Creates a bounding box from its top-left corner and dimensions.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The tight bounding rectangle of a contour's points.
    ///
    /// Returns a degenerate zero-size box for an empty contour.
    pub fn from_contour(contour: &Contour<u32>) -> Self {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        for p in &contour.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if contour.points.is_empty() {
            return Self::new(0, 0, 0, 0);
        }
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Vertical center, used for row membership and reading order.
    #[inline]
    pub fn center_y(&self) -> u32 {
        self.y + self.height / 2
    }

    /// Horizontal center.
    #[inline]
    pub fn center_x(&self) -> u32 {
        self.x + self.width / 2
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the box encloses no pixels.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// True when this box contains the point `(px, py)`.
    pub fn contains_point(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// True when the two boxes share any pixel.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// The smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Returns the box shifted by `(dx, dy)`.
    pub fn translate(&self, dx: u32, dy: u32) -> BoundingBox {
        BoundingBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Expands the box by `pad` pixels on every side, clamped to the image.
    pub fn padded(&self, pad: u32, image_width: u32, image_height: u32) -> BoundingBox {
        let x = self.x.saturating_sub(pad);
        let y = self.y.saturating_sub(pad);
        let right = (self.right() + pad).min(image_width);
        let bottom = (self.bottom() + pad).min(image_height);
        BoundingBox::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}
