//! Software raster canvas over an RGBA pixel buffer.

use image::{Rgba, RgbaImage};

use crate::geometry::{IRect, ISize, Matrix, Rect};
use crate::picture::Color;

pub struct Canvas {
    pixels: RgbaImage,
    matrix: Matrix,
    saved_matrices: Vec<Matrix>,
}

impl Canvas {
    pub fn new(size: ISize) -> Self {
        let width = size.width.max(0) as u32;
        let height = size.height.max(0) as u32;
        Self::from_image(RgbaImage::new(width, height))
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            matrix: Matrix::IDENTITY,
            saved_matrices: Vec::new(),
        }
    }

    pub fn size(&self) -> ISize {
        ISize::new(self.pixels.width() as i32, self.pixels.height() as i32)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn total_matrix(&self) -> Matrix {
        self.matrix
    }

    pub fn save(&mut self) {
        self.saved_matrices.push(self.matrix);
    }

    pub fn restore(&mut self) {
        if let Some(matrix) = self.saved_matrices.pop() {
            self.matrix = matrix;
        }
    }

    pub fn save_count(&self) -> usize {
        self.saved_matrices.len()
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.matrix = self.matrix.pre_translate(dx, dy);
    }

    pub fn concat(&mut self, matrix: &Matrix) {
        self.matrix = self.matrix.pre_concat(matrix);
    }

    pub fn set_matrix(&mut self, matrix: Matrix) {
        self.matrix = matrix;
    }

    pub fn reset_matrix(&mut self) {
        self.matrix = Matrix::IDENTITY;
    }

    pub fn clear(&mut self, color: Color) {
        let fill = Rgba(color.to_rgba());
        for pixel in self.pixels.pixels_mut() {
            *pixel = fill;
        }
    }

    /// Fills the device-space bounds of `rect` under the current matrix.
    pub fn draw_rect(&mut self, rect: &Rect, color: Color) {
        let device = self.matrix.map_rect(rect);
        let Some(bounds) = self.clip_to_pixels(&device) else {
            return;
        };
        let source = color.to_rgba();
        for y in bounds.top..bounds.bottom {
            for x in bounds.left..bounds.right {
                let pixel = self.pixels.get_pixel_mut(x as u32, y as u32);
                blend_source_over(pixel, source);
            }
        }
    }

    /// Composites `image` with its top-left corner at device pixel `(left, top)`.
    pub fn draw_image(&mut self, image: &RgbaImage, left: i32, top: i32) {
        let size = self.size();
        for (x, y, source) in image.enumerate_pixels() {
            let device_x = left + x as i32;
            let device_y = top + y as i32;
            if device_x < 0 || device_y < 0 || device_x >= size.width || device_y >= size.height {
                continue;
            }
            let pixel = self.pixels.get_pixel_mut(device_x as u32, device_y as u32);
            blend_source_over(pixel, source.0);
        }
    }

    fn clip_to_pixels(&self, device: &Rect) -> Option<IRect> {
        let size = self.size();
        let bounds = IRect {
            left: device.left.round().max(0.0) as i32,
            top: device.top.round().max(0.0) as i32,
            right: (device.right.round() as i32).min(size.width),
            bottom: (device.bottom.round() as i32).min(size.height),
        };
        (!bounds.is_empty()).then_some(bounds)
    }
}

fn blend_source_over(destination: &mut Rgba<u8>, source: [u8; 4]) {
    let source_alpha = source[3] as u32;
    if source_alpha == 255 {
        destination.0 = source;
        return;
    }
    if source_alpha == 0 {
        return;
    }
    let inverse_alpha = 255 - source_alpha;
    let destination_alpha = destination.0[3] as u32;
    let out_alpha = source_alpha + destination_alpha * inverse_alpha / 255;
    if out_alpha == 0 {
        destination.0 = [0, 0, 0, 0];
        return;
    }
    for channel in 0..3 {
        let source_term = source[channel] as u32 * source_alpha;
        let destination_term = destination.0[channel] as u32 * destination_alpha * inverse_alpha / 255;
        destination.0[channel] = ((source_term + destination_term) / out_alpha) as u8;
    }
    destination.0[3] = out_alpha as u8;
}
