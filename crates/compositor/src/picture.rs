use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::canvas::Canvas;
use crate::geometry::Rect;

/// Straight-alpha ARGB color packed as `0xAARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Color = Color(0x0000_0000);
    pub const BLACK: Color = Color(0xFF00_0000);
    pub const WHITE: Color = Color(0xFFFF_FFFF);
    pub const RED: Color = Color(0xFFFF_0000);
    pub const GREEN: Color = Color(0xFF00_FF00);
    pub const BLUE: Color = Color(0xFF00_00FF);

    pub const fn from_argb(alpha: u8, red: u8, green: u8, blue: u8) -> Self {
        Color(((alpha as u32) << 24) | ((red as u32) << 16) | ((green as u32) << 8) | blue as u32)
    }

    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8, self.alpha()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear(Color),
    Rect { rect: Rect, color: Color },
}

static NEXT_PICTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable recorded list of drawing operations.
#[derive(Debug)]
pub struct Picture {
    unique_id: u64,
    cull_rect: Rect,
    ops: SmallVec<[DrawOp; 4]>,
}

impl Picture {
    /// Empty picture that only carries a cull rect.
    pub fn placeholder(cull_rect: Rect) -> Arc<Picture> {
        PictureRecorder::begin_recording(cull_rect).finish_recording_as_picture()
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn cull_rect(&self) -> Rect {
        self.cull_rect
    }

    pub fn approximate_op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn playback(&self, canvas: &mut Canvas) {
        for op in &self.ops {
            match op {
                DrawOp::Clear(color) => canvas.clear(*color),
                DrawOp::Rect { rect, color } => canvas.draw_rect(rect, *color),
            }
        }
    }
}

pub struct PictureRecorder {
    cull_rect: Rect,
    ops: SmallVec<[DrawOp; 4]>,
}

impl PictureRecorder {
    pub fn begin_recording(cull_rect: Rect) -> Self {
        Self {
            cull_rect,
            ops: SmallVec::new(),
        }
    }

    pub fn clear(&mut self, color: Color) -> &mut Self {
        self.ops.push(DrawOp::Clear(color));
        self
    }

    pub fn draw_rect(&mut self, rect: Rect, color: Color) -> &mut Self {
        self.ops.push(DrawOp::Rect { rect, color });
        self
    }

    pub fn finish_recording_as_picture(self) -> Arc<Picture> {
        Arc::new(Picture {
            unique_id: NEXT_PICTURE_ID.fetch_add(1, Ordering::Relaxed),
            cull_rect: self.cull_rect,
            ops: self.ops,
        })
    }
}
