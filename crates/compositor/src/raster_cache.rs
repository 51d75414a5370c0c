//! Memoized rasterizations of pictures and layer subtrees.
//!
//! Entries are keyed by the paintable's identity and the full transform it is
//! drawn with. A picture only gets an image once it has been prepared more than
//! `access_threshold` times; a layer gets one on its first preparation. Entries
//! not touched during a frame are evicted by `sweep_after_frame`.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;

use crate::canvas::Canvas;
use crate::geometry::{IRect, Matrix, Rect};
use crate::layer::{Layer, PaintContext};
use crate::picture::Picture;

pub const DEFAULT_ACCESS_THRESHOLD: usize = 3;
pub const DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME: usize = 3;
const MIN_OPS_FOR_SIMPLE_PICTURE_CACHING: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterCacheKey {
    id: u64,
    matrix_bits: [u32; 6],
}

impl RasterCacheKey {
    pub fn new(id: u64, matrix: &Matrix) -> Self {
        Self {
            id,
            matrix_bits: matrix.key_bits(),
        }
    }
}

/// Offscreen image plus the logical rect it was rendered from.
pub struct RasterCacheResult {
    image: RgbaImage,
    logical_rect: Rect,
}

impl RasterCacheResult {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_bytes(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize * 4
    }

    fn draw(&self, canvas: &mut Canvas) {
        let bounds = canvas.total_matrix().map_rect(&self.logical_rect).round_out();
        canvas.draw_image(&self.image, bounds.left, bounds.top);
    }
}

#[derive(Default)]
struct RasterCacheEntry {
    used_this_frame: Cell<bool>,
    access_count: usize,
    result: Option<RasterCacheResult>,
}

pub struct RasterCache {
    access_threshold: usize,
    picture_cache_limit_per_frame: usize,
    picture_cached_this_frame: usize,
    picture_cache: HashMap<RasterCacheKey, RasterCacheEntry>,
    layer_cache: HashMap<RasterCacheKey, RasterCacheEntry>,
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_THRESHOLD, DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME)
    }
}

impl RasterCache {
    pub fn new(access_threshold: usize, picture_cache_limit_per_frame: usize) -> Self {
        Self {
            access_threshold,
            picture_cache_limit_per_frame,
            picture_cached_this_frame: 0,
            picture_cache: HashMap::new(),
            layer_cache: HashMap::new(),
        }
    }

    pub fn access_threshold(&self) -> usize {
        self.access_threshold
    }

    /// Counts one access of `picture` under `matrix` and rasterizes it once the
    /// access count exceeds the threshold. Returns whether a cached image exists.
    pub fn prepare_picture(
        &mut self,
        picture: &Arc<Picture>,
        is_complex: bool,
        will_change: bool,
        matrix: &Matrix,
    ) -> bool {
        if self.access_threshold == 0 {
            return false;
        }
        if self.picture_cached_this_frame >= self.picture_cache_limit_per_frame {
            return false;
        }
        if !is_picture_worth_rasterizing(picture, will_change, is_complex) {
            return false;
        }
        if !matrix.is_invertible() {
            return false;
        }
        let key = RasterCacheKey::new(picture.unique_id(), matrix);
        let entry = self.picture_cache.entry(key).or_default();
        entry.used_this_frame.set(true);
        entry.access_count += 1;
        if entry.access_count <= self.access_threshold {
            return false;
        }
        if entry.result.is_none() {
            let logical_rect = picture.cull_rect();
            entry.result = rasterize(&logical_rect, matrix, |canvas| picture.playback(canvas));
            self.picture_cached_this_frame += 1;
        }
        entry.result.is_some()
    }

    /// Rasterizes the layer's subtree on first preparation.
    pub fn prepare_layer(&mut self, layer: &Layer, matrix: &Matrix) -> bool {
        if !matrix.is_invertible() {
            return false;
        }
        let key = RasterCacheKey::new(layer.unique_id(), matrix);
        let entry = self.layer_cache.entry(key).or_default();
        entry.used_this_frame.set(true);
        entry.access_count += 1;
        if entry.result.is_none() {
            let logical_rect = layer.paint_bounds();
            entry.result = rasterize(&logical_rect, matrix, |canvas| {
                layer.paint(&mut PaintContext {
                    canvas,
                    raster_cache: None,
                });
            });
        }
        entry.result.is_some()
    }

    pub fn draw_picture(&self, picture: &Picture, canvas: &mut Canvas) -> bool {
        let key = RasterCacheKey::new(picture.unique_id(), &canvas.total_matrix());
        draw_entry(self.picture_cache.get(&key), canvas)
    }

    pub fn draw_layer(&self, layer: &Layer, canvas: &mut Canvas) -> bool {
        let key = RasterCacheKey::new(layer.unique_id(), &canvas.total_matrix());
        draw_entry(self.layer_cache.get(&key), canvas)
    }

    pub fn sweep_after_frame(&mut self) {
        sweep_one_cache_after_frame(&mut self.picture_cache);
        sweep_one_cache_after_frame(&mut self.layer_cache);
        self.picture_cached_this_frame = 0;
    }

    pub fn clear(&mut self) {
        self.picture_cache.clear();
        self.layer_cache.clear();
        self.picture_cached_this_frame = 0;
    }

    pub fn cached_entries_count(&self) -> usize {
        self.layer_cache.len() + self.picture_cache.len()
    }

    pub fn layer_cached_entries_count(&self) -> usize {
        self.layer_cache.len()
    }

    pub fn picture_cached_entries_count(&self) -> usize {
        self.picture_cache.len()
    }

    pub fn estimate_layer_cache_byte_size(&self) -> usize {
        estimate_byte_size(&self.layer_cache)
    }

    pub fn estimate_picture_cache_byte_size(&self) -> usize {
        estimate_byte_size(&self.picture_cache)
    }
}

fn is_picture_worth_rasterizing(picture: &Picture, will_change: bool, is_complex: bool) -> bool {
    if will_change {
        return false;
    }
    let cull_rect = picture.cull_rect();
    if cull_rect.is_empty() || !cull_rect.width().is_finite() || !cull_rect.height().is_finite() {
        return false;
    }
    if is_complex {
        return true;
    }
    picture.approximate_op_count() > MIN_OPS_FOR_SIMPLE_PICTURE_CACHING
}

fn rasterize(
    logical_rect: &Rect,
    matrix: &Matrix,
    draw: impl FnOnce(&mut Canvas),
) -> Option<RasterCacheResult> {
    let device_bounds: IRect = matrix.map_rect(logical_rect).round_out();
    if device_bounds.is_empty() {
        return None;
    }
    let mut canvas = Canvas::new(device_bounds.size());
    canvas.set_matrix(
        Matrix::translate(-device_bounds.left as f32, -device_bounds.top as f32).pre_concat(matrix),
    );
    draw(&mut canvas);
    Some(RasterCacheResult {
        image: canvas.into_image(),
        logical_rect: *logical_rect,
    })
}

fn draw_entry(entry: Option<&RasterCacheEntry>, canvas: &mut Canvas) -> bool {
    let Some(entry) = entry else {
        return false;
    };
    entry.used_this_frame.set(true);
    match &entry.result {
        Some(result) => {
            result.draw(canvas);
            true
        }
        None => false,
    }
}

fn sweep_one_cache_after_frame(cache: &mut HashMap<RasterCacheKey, RasterCacheEntry>) {
    cache.retain(|_, entry| entry.used_this_frame.replace(false));
}

fn estimate_byte_size(cache: &HashMap<RasterCacheKey, RasterCacheEntry>) -> usize {
    cache
        .values()
        .filter_map(|entry| entry.result.as_ref())
        .map(RasterCacheResult::image_bytes)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ISize, Point};
    use crate::layer::PictureLayer;
    use crate::picture::{Color, PictureRecorder};

    fn sized_picture(width: f32, height: f32) -> Arc<Picture> {
        let mut recorder = PictureRecorder::begin_recording(Rect::from_wh(width, height));
        recorder.draw_rect(Rect::from_wh(width, height), Color::RED);
        recorder.finish_recording_as_picture()
    }

    #[test]
    fn picture_is_cached_only_after_threshold_accesses() {
        let mut cache = RasterCache::default();
        let picture = sized_picture(10.0, 10.0);
        let mut canvas = Canvas::new(ISize::new(20, 20));

        for _ in 0..DEFAULT_ACCESS_THRESHOLD {
            assert!(!cache.prepare_picture(&picture, true, false, &Matrix::IDENTITY));
            assert!(!cache.draw_picture(&picture, &mut canvas));
            cache.sweep_after_frame();
        }

        assert!(cache.prepare_picture(&picture, true, false, &Matrix::IDENTITY));
        assert!(cache.draw_picture(&picture, &mut canvas));
        assert_eq!(canvas.image().get_pixel(5, 5).0, [255, 0, 0, 255]);
    }

    #[test]
    fn zero_threshold_disables_picture_caching() {
        let mut cache = RasterCache::new(0, DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME);
        let picture = sized_picture(10.0, 10.0);
        for _ in 0..5 {
            assert!(!cache.prepare_picture(&picture, true, false, &Matrix::IDENTITY));
        }
        assert_eq!(cache.cached_entries_count(), 0);
    }

    #[test]
    fn simple_or_changing_pictures_are_not_cached() {
        let mut cache = RasterCache::new(1, DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME);
        let picture = sized_picture(10.0, 10.0);
        for _ in 0..3 {
            assert!(!cache.prepare_picture(&picture, false, false, &Matrix::IDENTITY));
            assert!(!cache.prepare_picture(&picture, true, true, &Matrix::IDENTITY));
        }
        let empty = Picture::placeholder(Rect::EMPTY);
        assert!(!cache.prepare_picture(&empty, true, false, &Matrix::IDENTITY));
    }

    #[test]
    fn singular_matrix_is_never_cached() {
        let mut cache = RasterCache::new(1, DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME);
        let picture = sized_picture(10.0, 10.0);
        for _ in 0..3 {
            assert!(!cache.prepare_picture(&picture, true, false, &Matrix::scale(0.0, 0.0)));
        }
    }

    #[test]
    fn per_frame_limit_caps_new_picture_rasterizations() {
        let mut cache = RasterCache::new(1, 1);
        let first = sized_picture(4.0, 4.0);
        let second = sized_picture(4.0, 4.0);
        for _ in 0..2 {
            cache.prepare_picture(&first, true, false, &Matrix::IDENTITY);
            cache.prepare_picture(&second, true, false, &Matrix::IDENTITY);
        }
        assert_eq!(cache.estimate_picture_cache_byte_size(), 4 * 4 * 4);

        cache.sweep_after_frame();
        assert!(cache.prepare_picture(&second, true, false, &Matrix::IDENTITY));
        assert_eq!(cache.estimate_picture_cache_byte_size(), 2 * 4 * 4 * 4);
    }

    #[test]
    fn layer_is_cached_on_first_prepare_and_accounted_separately() {
        let mut cache = RasterCache::default();
        let picture = sized_picture(10.0, 10.0);
        for _ in 0..=DEFAULT_ACCESS_THRESHOLD {
            cache.prepare_picture(&picture, true, false, &Matrix::IDENTITY);
        }
        let mut layer: Layer =
            PictureLayer::new(Point::default(), sized_picture(100.0, 100.0), false, false).into();
        layer.set_paint_bounds(Rect::from_wh(100.0, 100.0));

        assert!(cache.prepare_layer(&layer, &Matrix::IDENTITY));

        assert_eq!(cache.estimate_layer_cache_byte_size(), 40_000);
        assert_eq!(cache.estimate_picture_cache_byte_size(), 400);
        assert_eq!(cache.layer_cached_entries_count(), 1);
        assert_eq!(cache.picture_cached_entries_count(), 1);
    }

    #[test]
    fn sweep_evicts_entries_unused_this_frame() {
        let mut cache = RasterCache::default();
        let picture = sized_picture(10.0, 10.0);
        cache.prepare_picture(&picture, true, false, &Matrix::IDENTITY);
        assert_eq!(cache.cached_entries_count(), 1);

        cache.sweep_after_frame();
        assert_eq!(cache.cached_entries_count(), 1);
        cache.sweep_after_frame();
        assert_eq!(cache.cached_entries_count(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = RasterCache::default();
        let mut layer: Layer =
            PictureLayer::new(Point::default(), sized_picture(8.0, 8.0), false, false).into();
        layer.set_paint_bounds(Rect::from_wh(8.0, 8.0));
        cache.prepare_layer(&layer, &Matrix::IDENTITY);
        cache.clear();
        assert_eq!(cache.cached_entries_count(), 0);
        assert_eq!(cache.estimate_layer_cache_byte_size(), 0);
    }
}
