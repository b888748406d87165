//! Rectangular regions of a video frame

use std::fmt;

const ALL_ORIGIN: i32 = -(1 << 29);
const ALL_EXTENT: i32 = 1 << 30;

/// Integer rectangle in frame coordinates.
///
/// Width and height are never negative. An empty intersection is represented
/// as `None` by the functions that can produce one, so `Option<Region>` is the
/// "maybe no region" type used throughout the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A point within the video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Region {
    /// Covers every pixel of any frame. Identity element of [`Region::intersect`].
    pub const ALL: Region = Region {
        x: ALL_ORIGIN,
        y: ALL_ORIGIN,
        width: ALL_EXTENT,
        height: ALL_EXTENT,
    };

    /// Negative sizes are clamped to zero.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    /// Build a region from its edges. Returns `None` if it would be empty.
    pub fn from_extents(x: i32, y: i32, right: i32, bottom: i32) -> Option<Self> {
        if right <= x || bottom <= y {
            return None;
        }
        Some(Self::new(x, y, right - x, bottom - y))
    }

    /// The region covering a whole `width` x `height` image.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_all(&self) -> bool {
        *self == Region::ALL
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Check if this region contains a point
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Get the center point of this region
    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Move each edge outwards by the given amounts (negative values move it
    /// the other way). `None` if the result is empty.
    pub fn extend(&self, x: i32, y: i32, right: i32, bottom: i32) -> Option<Self> {
        Self::from_extents(
            self.x + x,
            self.y + y,
            self.right() + right,
            self.bottom() + bottom,
        )
    }

    /// Overlap of two optional regions. `None` is absorbing, [`Region::ALL`]
    /// is the identity.
    pub fn intersect(a: Option<Region>, b: Option<Region>) -> Option<Region> {
        let (a, b) = (a?, b?);
        Self::from_extents(
            a.x.max(b.x),
            a.y.max(b.y),
            a.right().min(b.right()),
            a.bottom().min(b.bottom()),
        )
    }

    /// Smallest region containing every given region.
    pub fn bounding_box<I>(regions: I) -> Option<Region>
    where
        I: IntoIterator<Item = Region>,
    {
        regions
            .into_iter()
            .filter(|r| !r.is_empty())
            .reduce(|a, b| Region {
                x: a.x.min(b.x),
                y: a.y.min(b.y),
                width: a.right().max(b.right()) - a.x.min(b.x),
                height: a.bottom().max(b.bottom()) - a.y.min(b.y),
            })
    }

    /// Clip to an image of the given size, as unsigned crop coordinates
    /// `(x, y, width, height)`.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let r = Self::intersect(Some(*self), Some(Self::full_frame(width, height)))?;
        Some((r.x as u32, r.y as u32, r.width as u32, r.height as u32))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return write!(f, "Region.ALL");
        }
        write!(
            f,
            "Region(x={}, y={}, right={}, bottom={})",
            self.x,
            self.y,
            self.right(),
            self.bottom()
        )
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position(x={}, y={})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Option<Region>> {
        vec![
            None,
            Some(Region::ALL),
            Some(Region::new(0, 0, 10, 10)),
            Some(Region::new(5, 5, 10, 10)),
            Some(Region::new(-3, 2, 4, 40)),
            Some(Region::new(20, 20, 1, 1)),
            Some(Region::new(9, 0, 1, 10)),
        ]
    }

    #[test]
    fn test_intersect_with_all_is_identity() {
        for r in samples() {
            assert_eq!(Region::intersect(r, Some(Region::ALL)), r);
            assert_eq!(Region::intersect(Some(Region::ALL), r), r);
        }
    }

    #[test]
    fn test_intersect_is_commutative_and_associative() {
        let all = samples();
        for &a in &all {
            for &b in &all {
                assert_eq!(Region::intersect(a, b), Region::intersect(b, a));
                for &c in &all {
                    assert_eq!(
                        Region::intersect(Region::intersect(a, b), c),
                        Region::intersect(a, Region::intersect(b, c)),
                        "{a:?} {b:?} {c:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_intersect_disjoint_is_none() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(10, 0, 10, 10);
        assert_eq!(Region::intersect(Some(a), Some(b)), None);
        assert_eq!(
            Region::intersect(Some(a), Some(Region::new(5, 5, 10, 10))),
            Some(Region::new(5, 5, 5, 5))
        );
    }

    #[test]
    fn test_negative_size_is_clamped() {
        let r = Region::new(3, 4, -5, 2);
        assert_eq!(r.width, 0);
        assert!(r.is_empty());
    }

    #[test]
    fn test_contains_and_center() {
        let r = Region::new(100, 150, 50, 50);
        assert!(r.contains(100, 150));
        assert!(r.contains(149, 199));
        assert!(!r.contains(150, 150));
        assert_eq!(r.center(), Position::new(125, 175));
    }

    #[test]
    fn test_extend_and_translate() {
        let r = Region::new(10, 10, 5, 5);
        assert_eq!(r.extend(-4, -4, 0, 0), Some(Region::new(6, 6, 9, 9)));
        assert_eq!(r.extend(0, 0, -5, 0), None);
        assert_eq!(r.translate(2, -3), Region::new(12, 7, 5, 5));
    }

    #[test]
    fn test_clip_to_frame() {
        let r = Region::new(1000, 2200, 200, 200);
        assert_eq!(r.clip_to(1080, 2280), Some((1000, 2200, 80, 80)));
        assert_eq!(Region::ALL.clip_to(64, 48), Some((0, 0, 64, 48)));
        assert_eq!(Region::new(-10, -10, 5, 5).clip_to(64, 48), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Region::ALL.to_string(), "Region.ALL");
        assert_eq!(
            Region::new(1, 2, 3, 4).to_string(),
            "Region(x=1, y=2, right=4, bottom=6)"
        );
    }

    #[test]
    fn test_bounding_box() {
        let bb = Region::bounding_box([Region::new(0, 0, 2, 2), Region::new(5, 6, 1, 1)]);
        assert_eq!(bb, Some(Region::new(0, 0, 6, 7)));
        assert_eq!(Region::bounding_box(Vec::new()), None);
    }
}
