//! Utility types, used throughout the crate.
//! Integer geometry in document pixel space: +X right, +Y down, origin top left.

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}
impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
    /// Round a floating point position, as received from pointer input.
    #[must_use]
    pub fn from_f32(x: f32, y: f32) -> Self {
        Self {
            x: x.round() as i32,
            y: y.round() as i32,
        }
    }
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}
impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}
impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle. `x`,`y` is the top-left corner.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
    #[must_use]
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }
    /// The rectangle spanned by two corners, in any order.
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        let (left, right) = (a.x.min(b.x), a.x.max(b.x));
        let (top, bottom) = (a.y.min(b.y), a.y.max(b.y));
        Self::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
    #[must_use]
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
    /// Exclusive right edge.
    #[must_use]
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }
    /// Exclusive bottom edge.
    #[must_use]
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.y >= self.y && point.x < self.right() && point.y < self.bottom()
    }
    #[must_use]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
    /// Grow (or shrink, if negative) the rectangle on every side.
    #[must_use]
    pub fn padded(&self, amount: i32) -> Self {
        let width = (self.width as i32 + amount * 2).max(0) as u32;
        let height = (self.height as i32 + amount * 2).max(0) as u32;
        Self::new(self.x - amount, self.y - amount, width, height)
    }
    /// Overlapping area, or None if the rectangles do not overlap.
    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > left && bottom > top)
            .then(|| Rect::new(left, top, (right - left) as u32, (bottom - top) as u32))
    }
    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }
    /// Move and shrink this rectangle until it lies entirely inside `bounds`.
    /// Moving is preferred over shrinking, so a rectangle that fits is never resized.
    #[must_use]
    pub fn clamped_into(&self, bounds: &Rect) -> Rect {
        let width = self.width.min(bounds.width);
        let height = self.height.min(bounds.height);
        let max_x = bounds.right() - width as i32;
        let max_y = bounds.bottom() - height as i32;
        Rect::new(
            self.x.clamp(bounds.x, max_x),
            self.y.clamp(bounds.y, max_y),
            width,
            height,
        )
    }
}

/// Where old content is pinned when a buffer is resized.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Default,
    strum::EnumIter,
    strum::AsRefStr,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Anchor {
    #[default]
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}
impl Anchor {
    /// Offset at which content of size `old` is placed within a buffer of size `new`.
    #[must_use]
    pub fn offset(self, old: Size, new: Size) -> Point {
        let dx = i64::from(new.width) - i64::from(old.width);
        let dy = i64::from(new.height) - i64::from(old.height);
        let (fx, fy) = match self {
            Self::TopLeft => (0, 0),
            Self::Top => (1, 0),
            Self::TopRight => (2, 0),
            Self::Left => (0, 1),
            Self::Center => (1, 1),
            Self::Right => (2, 1),
            Self::BottomLeft => (0, 2),
            Self::Bottom => (1, 2),
            Self::BottomRight => (2, 2),
        };
        Point::new((dx * fx / 2) as i32, (dy * fy / 2) as i32)
    }
}

/// Clamp an opacity into `0.0..=1.0`. NaN becomes fully opaque.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn clamp_prefers_moving() {
        let bounds = Rect::new(0, 0, 100, 100);
        let past_edge = Rect::new(80, 10, 40, 40);
        let clamped = past_edge.clamped_into(&bounds);
        assert_eq!(clamped, Rect::new(60, 10, 40, 40));
        assert!(bounds.contains_rect(&clamped));

        let too_big = Rect::new(-10, -10, 300, 50);
        assert_eq!(too_big.clamped_into(&bounds), Rect::new(0, 0, 100, 50));
    }
    #[test]
    fn anchor_offsets() {
        let old = Size::new(10, 10);
        let new = Size::new(20, 30);
        assert_eq!(Anchor::TopLeft.offset(old, new), Point::new(0, 0));
        assert_eq!(Anchor::Center.offset(old, new), Point::new(5, 10));
        assert_eq!(Anchor::BottomRight.offset(old, new), Point::new(10, 20));
        // Shrinking moves content up-left.
        assert_eq!(Anchor::Center.offset(new, old), Point::new(-5, -10));
    }
    #[test]
    fn intersection_and_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert_eq!(a.intersection(&Rect::new(10, 0, 5, 5)), None);
    }
}
