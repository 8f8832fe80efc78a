//! Rectangles, regions and the eight Wayland output transforms.
//!
//! Every coordinate in this crate lives in one space: buffer pixels. Unlike
//! the teacher's `utils::geometry`, there is no `Logical`/`Physical`/`Buffer`
//! phantom-type distinction here — screencopy buffers are always dealt with
//! in their own pixel space, so a bare `Rectangle` is enough.

use std::cmp::{max, min};

/// A rectangle defined by its top-left corner and its dimensions, in pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_extremities(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Rectangle::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn x2(&self) -> i32 {
        self.x + self.width
    }

    pub fn y2(&self) -> i32 {
        self.y + self.height
    }

    pub fn contains(&self, point: (i32, i32)) -> bool {
        let (x, y) = point;
        x >= self.x && x < self.x2() && y >= self.y && y < self.y2()
    }

    pub fn overlaps(&self, other: &Rectangle) -> bool {
        self.x < other.x2() && other.x < self.x2() && self.y < other.y2() && other.y < self.y2()
    }

    /// The overlapping area of two rectangles, or `None` if they don't overlap.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Rectangle::from_extremities(
            max(self.x, other.x),
            max(self.y, other.y),
            min(self.x2(), other.x2()),
            min(self.y2(), other.y2()),
        ))
    }

    /// The smallest rectangle containing both `self` and `other`.
    pub fn merge(&self, other: &Rectangle) -> Rectangle {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rectangle::from_extremities(
            min(self.x, other.x),
            min(self.y, other.y),
            max(self.x2(), other.x2()),
            max(self.y2(), other.y2()),
        )
    }

    /// Round this rectangle's extremities down/up to multiples of `tile`,
    /// expressed in tile units rather than pixels (e.g. for a 32px tile grid,
    /// a rectangle spanning pixels 10..40 rounds to tiles 0..2).
    pub fn tile_round(&self, tile: i32) -> Rectangle {
        let x1 = self.x.div_euclid(tile);
        let y1 = self.y.div_euclid(tile);
        let x2 = div_ceil(self.x2(), tile);
        let y2 = div_ceil(self.y2(), tile);
        Rectangle::from_extremities(x1, y1, x2, y2)
    }
}

fn div_ceil(n: i32, d: i32) -> i32 {
    (n + d - 1).div_euclid(d)
}

/// A set of non-overlapping rectangles, used for damage hints and refined
/// damage alike. Kept as a flat `Vec` rather than a BSP/interval tree:
/// damage regions in this crate are always small (a handful of rectangles
/// per frame), so the teacher's pixman-style region trees would be
/// overkill — union and intersect are implemented as simple rect-merges.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    pub fn empty() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn single(rect: Rectangle) -> Self {
        if rect.is_empty() {
            Self::empty()
        } else {
            Self { rects: vec![rect] }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    pub fn extents(&self) -> Option<Rectangle> {
        self.rects.iter().copied().reduce(|a, b| a.merge(&b))
    }

    /// Add `rect` to the region. Adjacent/overlapping rectangles are *not*
    /// coalesced beyond a simple absorb-if-contained check; damage
    /// refinement never needs a minimal rectangle count, only a correct
    /// superset, so we keep this cheap.
    pub fn union_rect(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| r.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains_rect(r));
        self.rects.push(rect);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    /// Intersect this region with a single bounding rectangle (e.g. the
    /// whole-framebuffer clamp at the end of damage refinement).
    pub fn intersect_rect(&self, clip: Rectangle) -> Region {
        let rects = self.rects.iter().filter_map(|r| r.intersection(&clip)).collect();
        Region { rects }
    }
}

impl Rectangle {
    fn contains_rect(&self, other: &Rectangle) -> bool {
        other.x >= self.x && other.y >= self.y && other.x2() <= self.x2() && other.y2() <= self.y2()
    }
}

/// One of the eight Wayland-defined rotations/flips applied to a surface
/// before display. Mirrors `wl_output::Transform` one-to-one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    #[default]
    Normal,
    _90,
    _180,
    _270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    /// Inverts any 90-degree rotation into its opposite; flips and 180/Normal
    /// are their own inverse.
    pub fn invert(&self) -> Transform {
        match self {
            Transform::Normal => Transform::Normal,
            Transform::Flipped => Transform::Flipped,
            Transform::_90 => Transform::_270,
            Transform::_180 => Transform::_180,
            Transform::_270 => Transform::_90,
            Transform::Flipped90 => Transform::Flipped270,
            Transform::Flipped180 => Transform::Flipped180,
            Transform::Flipped270 => Transform::Flipped90,
        }
    }

    /// Whether this transform swaps width and height.
    pub fn swaps_dimensions(&self) -> bool {
        matches!(
            self,
            Transform::_90 | Transform::_270 | Transform::Flipped90 | Transform::Flipped270
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_disjoint_is_none() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(20, 20, 10, 10);
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn intersection_overlap() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Rectangle::new(5, 5, 5, 5)));
    }

    #[test]
    fn merge_bounding_box() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(20, 20, 10, 10);
        assert_eq!(a.merge(&b), Rectangle::new(0, 0, 30, 30));
    }

    #[test]
    fn tile_round_covers_partial_tiles() {
        let r = Rectangle::new(40, 40, 1, 1);
        assert_eq!(r.tile_round(32), Rectangle::new(1, 1, 1, 1));
    }

    #[test]
    fn tile_round_spans_multiple_tiles() {
        let r = Rectangle::new(10, 10, 40, 5);
        // x: 10..50 -> tiles 0..2, y: 10..15 -> tile 0..1
        assert_eq!(r.tile_round(32), Rectangle::new(0, 0, 2, 1));
    }

    #[test]
    fn region_union_absorbs_contained_rect() {
        let mut region = Region::empty();
        region.union_rect(Rectangle::new(0, 0, 100, 100));
        region.union_rect(Rectangle::new(10, 10, 5, 5));
        assert_eq!(region.rects().len(), 1);
    }

    #[test]
    fn region_intersect_rect_clips() {
        let mut region = Region::empty();
        region.union_rect(Rectangle::new(-5, -5, 10, 10));
        let clipped = region.intersect_rect(Rectangle::new(0, 0, 100, 100));
        assert_eq!(clipped.rects(), &[Rectangle::new(0, 0, 5, 5)]);
    }

    #[test]
    fn transform_invert_roundtrip() {
        for t in [
            Transform::Normal,
            Transform::_90,
            Transform::_180,
            Transform::_270,
            Transform::Flipped,
            Transform::Flipped90,
            Transform::Flipped180,
            Transform::Flipped270,
        ] {
            assert_eq!(t.invert().invert(), t);
        }
    }
}
