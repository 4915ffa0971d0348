//! Rectangular regions in tile coordinate space.

use crate::{TileCoord, bbox_to_xyz};

/// A rectangle of tile coordinates at a single zoom level.
///
/// Inclusive of both min and max coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub zoom: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRect {
    /// # Panics
    ///
    /// Panics if `min_x > max_x` or `min_y > max_y`.
    #[must_use]
    pub fn new(zoom: u8, min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        assert!(min_x <= max_x);
        assert!(min_y <= max_y);
        Self {
            zoom,
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The rectangle of tiles covering `bbox` (`[west, south, east, north]`)
    /// at the given zoom.
    #[must_use]
    pub fn covering(bbox: [f64; 4], zoom: u8) -> Self {
        let (min_x, min_y, max_x, max_y) = bbox_to_xyz(bbox[0], bbox[1], bbox[2], bbox[3], zoom);
        Self::new(zoom, min_x, min_y, max_x, max_y)
    }

    /// Total number of tiles contained in this rectangle.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.max_x - self.min_x + 1) * u64::from(self.max_y - self.min_y + 1)
    }

    /// Iterate the contained coordinates row-major: `y` outer, `x` inner.
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + use<> {
        let z = self.zoom;
        let x_range = self.min_x..=self.max_x;
        (self.min_y..=self.max_y)
            .flat_map(move |y| x_range.clone().map(move |x| TileCoord { z, x, y }))
    }
}
