//! Geometry primitives shared by layers, pictures and the raster cache.
//!
//! Rects are float edges in logical space; `IRect`/`ISize` are device pixels.
//! `Matrix` is a 2D affine transform stored row-major without the fixed last row.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ISize {
    pub width: i32,
    pub height: i32,
}

impl ISize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn size(&self) -> ISize {
        ISize::new(self.width(), self.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Cull rect used when nothing restricts painting.
pub const GIANT_RECT: Rect = Rect {
    left: -1e9,
    top: -1e9,
    right: 1e9,
    bottom: 1e9,
};

impl Rect {
    pub const EMPTY: Rect = Rect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_ltrb(x, y, x + width, y + height)
    }

    pub fn from_wh(width: f32, height: f32) -> Self {
        Self::from_xywh(0.0, 0.0, width, height)
    }

    pub fn from_size(size: ISize) -> Self {
        Self::from_wh(size.width as f32, size.height as f32)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        !(self.left < self.right && self.top < self.bottom)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::from_ltrb(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Smallest rect containing both; empty inputs are ignored.
    pub fn join(&self, other: &Rect) -> Self {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        Self::from_ltrb(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn intersect(&self, other: &Rect) -> Option<Self> {
        let rect = Self::from_ltrb(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!rect.is_empty()).then_some(rect)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }

    pub fn round_out(&self) -> IRect {
        IRect {
            left: self.left.floor() as i32,
            top: self.top.floor() as i32,
            right: self.right.ceil() as i32,
            bottom: self.bottom.ceil() as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub scale_x: f32,
    pub skew_x: f32,
    pub trans_x: f32,
    pub skew_y: f32,
    pub scale_y: f32,
    pub trans_y: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        scale_x: 1.0,
        skew_x: 0.0,
        trans_x: 0.0,
        skew_y: 0.0,
        scale_y: 1.0,
        trans_y: 0.0,
    };

    pub fn translate(dx: f32, dy: f32) -> Self {
        Self {
            trans_x: dx,
            trans_y: dy,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            scale_x: sx,
            scale_y: sy,
            ..Self::IDENTITY
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// `self * other`: `other` is applied to points first.
    pub fn pre_concat(&self, other: &Matrix) -> Self {
        Self {
            scale_x: self.scale_x * other.scale_x + self.skew_x * other.skew_y,
            skew_x: self.scale_x * other.skew_x + self.skew_x * other.scale_y,
            trans_x: self.scale_x * other.trans_x + self.skew_x * other.trans_y + self.trans_x,
            skew_y: self.skew_y * other.scale_x + self.scale_y * other.skew_y,
            scale_y: self.skew_y * other.skew_x + self.scale_y * other.scale_y,
            trans_y: self.skew_y * other.trans_x + self.scale_y * other.trans_y + self.trans_y,
        }
    }

    pub fn pre_translate(&self, dx: f32, dy: f32) -> Self {
        self.pre_concat(&Self::translate(dx, dy))
    }

    pub fn determinant(&self) -> f32 {
        self.scale_x * self.scale_y - self.skew_x * self.skew_y
    }

    pub fn is_invertible(&self) -> bool {
        let determinant = self.determinant();
        determinant.is_finite() && determinant.abs() > f32::EPSILON * f32::EPSILON
    }

    pub fn invert(&self) -> Option<Self> {
        if !self.is_invertible() {
            return None;
        }
        let inv_det = 1.0 / self.determinant();
        let scale_x = self.scale_y * inv_det;
        let skew_x = -self.skew_x * inv_det;
        let skew_y = -self.skew_y * inv_det;
        let scale_y = self.scale_x * inv_det;
        Some(Self {
            scale_x,
            skew_x,
            trans_x: -(scale_x * self.trans_x + skew_x * self.trans_y),
            skew_y,
            scale_y,
            trans_y: -(skew_y * self.trans_x + scale_y * self.trans_y),
        })
    }

    pub fn map_point(&self, point: Point) -> Point {
        Point::new(
            self.scale_x * point.x + self.skew_x * point.y + self.trans_x,
            self.skew_y * point.x + self.scale_y * point.y + self.trans_y,
        )
    }

    /// Bounding box of the four mapped corners.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(Point::new(rect.left, rect.top)),
            self.map_point(Point::new(rect.right, rect.top)),
            self.map_point(Point::new(rect.right, rect.bottom)),
            self.map_point(Point::new(rect.left, rect.bottom)),
        ];
        let mut mapped = Rect::from_ltrb(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        for corner in &corners[1..] {
            mapped.left = mapped.left.min(corner.x);
            mapped.top = mapped.top.min(corner.y);
            mapped.right = mapped.right.max(corner.x);
            mapped.bottom = mapped.bottom.max(corner.y);
        }
        mapped
    }

    /// Bit pattern of the components, usable as a hash key.
    pub fn key_bits(&self) -> [u32; 6] {
        [
            self.scale_x.to_bits(),
            self.skew_x.to_bits(),
            self.trans_x.to_bits(),
            self.skew_y.to_bits(),
            self.scale_y.to_bits(),
            self.trans_y.to_bits(),
        ]
    }
}
