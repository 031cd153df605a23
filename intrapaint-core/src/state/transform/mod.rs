use crate::util::{Point, Rect, Size};

/// A transform consisting of an optional horizontal flip, then uniform scale,
/// then rotation, then translation.
///
/// This transform maintains the "Similarity" of shapes and their image, maintaining
/// all angles and the ratios between all lengths.
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq, PartialOrd)]
#[repr(C)]
pub struct Similarity {
    /// Special interpretation: Negative bit set == hflip.
    /// Uniform scale should occur as abs(scale).
    pub flip_scale: f32,
    /// Rotation, in radians *CW* from positive X
    pub rotation: f32,
    /// Translation, in document pixels. 0,0 is top left, +X Right, +Y down.
    pub translation: [f32; 2],
}

impl Similarity {
    #[must_use]
    pub fn hflip(&self) -> bool {
        // We want the literal sign bit, regardless of the numerical interpretation.
        self.flip_scale.is_sign_negative()
    }
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.flip_scale.abs()
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self {
            flip_scale: 1.0,
            rotation: 0.0,
            translation: [0.0; 2],
        }
    }
}

/// An arbitrary affine transform. Units of output are document pixels.
#[derive(
    Copy,
    Clone,
    Debug,
    bytemuck::Pod,
    bytemuck::Zeroable,
    PartialEq,
    PartialOrd,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(C)]
pub struct Matrix {
    /// Column-major matrix elements
    pub elements: [[f32; 2]; 3],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Similarity> for Matrix {
    fn from(value: Similarity) -> Self {
        // Flip lives in the sign of the horizontal scale.
        let h_scale = value.flip_scale;
        let v_scale = value.scale();

        let (sin, cos) = value.rotation.sin_cos();

        Self {
            // Rotation times scale, and then translate.
            elements: [
                [h_scale * cos, h_scale * sin],
                [v_scale * -sin, v_scale * cos],
                value.translation,
            ],
        }
    }
}

impl From<[[f32; 2]; 3]> for Matrix {
    fn from(elements: [[f32; 2]; 3]) -> Self {
        Self { elements }
    }
}

impl From<Matrix> for [[f32; 2]; 3] {
    fn from(value: Matrix) -> Self {
        value.elements
    }
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        elements: [[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
    };
    /// Below this determinant the transform squashes everything to a line or a point.
    const DEGENERATE: f32 = 1e-6;

    #[must_use]
    pub fn from_translation(x: f32, y: f32) -> Self {
        Self {
            elements: [[1.0, 0.0], [0.0, 1.0], [x, y]],
        }
    }
    /// `similarity` applied around `center` rather than the origin.
    #[must_use]
    pub fn about(center: (f32, f32), similarity: Similarity) -> Self {
        Self::from_translation(-center.0, -center.1)
            .then(&similarity.into())
            .then(&Self::from_translation(center.0, center.1))
    }
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
    /// No rotation, scale or shear.
    #[must_use]
    pub fn is_translation(&self) -> bool {
        self.elements[0] == [1.0, 0.0] && self.elements[1] == [0.0, 1.0]
    }
    #[must_use]
    pub fn translation(&self) -> [f32; 2] {
        self.elements[2]
    }
    /// Whole-pixel translation component.
    #[must_use]
    pub fn pixel_offset(&self) -> Point {
        let [x, y] = self.elements[2];
        Point::from_f32(x, y)
    }
    /// Translation added after the rest of the transform.
    #[must_use]
    pub fn translated(self, dx: f32, dy: f32) -> Self {
        let [x, y] = self.elements[2];
        Self {
            elements: [self.elements[0], self.elements[1], [x + dx, y + dy]],
        }
    }
    /// `self`, followed by `after`.
    #[must_use]
    pub fn then(&self, after: &Self) -> Self {
        Self {
            elements: [
                after.map_vector(self.elements[0]),
                after.map_vector(self.elements[1]),
                after.map_point(self.elements[2]),
            ],
        }
    }
    /// `None` for degenerate transforms.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let [[a, b], [c, d]] = [self.elements[0], self.elements[1]];
        let det = a * d - c * b;
        if det.abs() < Self::DEGENERATE {
            return None;
        }
        let linear = Self {
            elements: [[d / det, -b / det], [-c / det, a / det], [0.0, 0.0]],
        };
        let [tx, ty] = linear.map_vector(self.elements[2]);
        Some(linear.translated(-tx, -ty))
    }
    #[must_use]
    pub fn map_point(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [vx, vy] = self.map_vector([x, y]);
        let [tx, ty] = self.elements[2];
        [vx + tx, vy + ty]
    }
    /// Linear part only, translation ignored.
    #[must_use]
    pub fn map_vector(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [[a, b], [c, d], _] = self.elements;
        [a * x + c * y, b * x + d * y]
    }
    /// Pixels covered by a `size` image placed by this transform.
    ///
    /// Pure translations place content on whole pixels, anything else covers the rounded-out
    /// bounds of its corners.
    #[must_use]
    pub fn cover(&self, size: Size) -> Rect {
        if self.is_translation() {
            let origin = self.pixel_offset();
            return Rect::new(origin.x, origin.y, size.width, size.height);
        }
        let (w, h) = (size.width as f32, size.height as f32);
        let corners = [[0.0, 0.0], [w, 0.0], [0.0, h], [w, h]].map(|corner| self.map_point(corner));
        let (mut min, mut max) = ([f32::INFINITY; 2], [f32::NEG_INFINITY; 2]);
        for [x, y] in corners {
            min = [min[0].min(x), min[1].min(y)];
            max = [max[0].max(x), max[1].max(y)];
        }
        // Rounding noise from sin/cos shouldn't grow the cover by a whole pixel.
        const SNAP: f32 = 1e-3;
        let left = (min[0] + SNAP).floor() as i32;
        let top = (min[1] + SNAP).floor() as i32;
        let right = (max[0] - SNAP).ceil() as i32;
        let bottom = (max[1] - SNAP).ceil() as i32;
        Rect::new(left, top, (right - left).max(0) as u32, (bottom - top).max(0) as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn close(a: [f32; 2], b: [f32; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-4 && (a[1] - b[1]).abs() < 1e-4
    }
    #[test]
    fn rounds_to_pixels() {
        let t = Matrix::from_translation(4.4, -2.6).translated(1.0, 0.0);
        assert_eq!(t.pixel_offset(), Point::new(5, -3));
        assert!(Matrix::default().is_identity());
        assert!(t.is_translation());
        assert!(!t.is_identity());
        assert_eq!(t.cover(Size::new(2, 3)), Rect::new(5, -3, 2, 3));
    }
    #[test]
    fn rotation_is_clockwise() {
        let quarter: Matrix = Similarity {
            rotation: FRAC_PI_2,
            ..Default::default()
        }
        .into();
        // +X turns toward +Y, which is down.
        assert!(close(quarter.map_point([1.0, 0.0]), [0.0, 1.0]));
        assert!(!quarter.is_translation());
        let around = Matrix::about((2.0, 2.0), Similarity {
            rotation: FRAC_PI_2,
            ..Default::default()
        });
        assert!(close(around.map_point([2.0, 2.0]), [2.0, 2.0]));
        assert!(close(around.map_point([4.0, 2.0]), [2.0, 4.0]));
    }
    #[test]
    fn compose_and_invert() {
        let scale: Matrix = Similarity {
            flip_scale: -2.0,
            ..Default::default()
        }
        .into();
        let moved = scale.then(&Matrix::from_translation(10.0, 0.0));
        assert!(close(moved.map_point([1.0, 1.0]), [8.0, 2.0]));
        let back = moved.inverse().unwrap();
        assert!(close(back.map_point([8.0, 2.0]), [1.0, 1.0]));
        assert!(moved.then(&back).is_translation());
        assert_eq!(Matrix::from([[0.0; 2]; 3]).inverse(), None);
    }
    #[test]
    fn cover_of_rotated_content() {
        let quarter = Matrix::about((2.0, 1.0), Similarity {
            rotation: FRAC_PI_2,
            ..Default::default()
        });
        // A 4x2 image turned on its side becomes 2x4, centered on the same point.
        assert_eq!(quarter.cover(Size::new(4, 2)), Rect::new(1, -1, 2, 4));
    }
}
