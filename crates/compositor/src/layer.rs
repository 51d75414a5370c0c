//! Retained scene layers.
//!
//! A frame is prerolled once (bounds computation, raster cache preparation)
//! and then painted. Layers whose subtree is marked for caching are painted
//! from a single raster cache entry once one exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::canvas::Canvas;
use crate::geometry::{Matrix, Point, Rect};
use crate::picture::Picture;
use crate::raster_cache::RasterCache;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

fn next_layer_id() -> u64 {
    NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct PrerollContext<'a> {
    pub raster_cache: Option<&'a mut RasterCache>,
    pub cull_rect: Rect,
    pub frame_device_pixel_ratio: f32,
}

pub struct PaintContext<'a> {
    pub canvas: &'a mut Canvas,
    pub raster_cache: Option<&'a RasterCache>,
}

#[derive(Debug, Clone, Copy)]
struct LayerState {
    unique_id: u64,
    paint_bounds: Rect,
}

impl LayerState {
    fn new() -> Self {
        Self {
            unique_id: next_layer_id(),
            paint_bounds: Rect::EMPTY,
        }
    }
}

pub enum Layer {
    Container(ContainerLayer),
    Transform(TransformLayer),
    Picture(PictureLayer),
}

impl Layer {
    fn state(&self) -> &LayerState {
        match self {
            Layer::Container(layer) => &layer.state,
            Layer::Transform(layer) => &layer.state,
            Layer::Picture(layer) => &layer.state,
        }
    }

    fn state_mut(&mut self) -> &mut LayerState {
        match self {
            Layer::Container(layer) => &mut layer.state,
            Layer::Transform(layer) => &mut layer.state,
            Layer::Picture(layer) => &mut layer.state,
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.state().unique_id
    }

    pub fn paint_bounds(&self) -> Rect {
        self.state().paint_bounds
    }

    pub fn set_paint_bounds(&mut self, paint_bounds: Rect) {
        self.state_mut().paint_bounds = paint_bounds;
    }

    pub fn needs_painting(&self) -> bool {
        !self.paint_bounds().is_empty()
    }

    fn caches_subtree(&self) -> bool {
        matches!(self, Layer::Container(layer) if layer.cache_subtree)
    }

    pub fn preroll(&mut self, context: &mut PrerollContext<'_>, matrix: &Matrix) {
        match self {
            Layer::Container(layer) => layer.preroll(context, matrix),
            Layer::Transform(layer) => layer.preroll(context, matrix),
            Layer::Picture(layer) => layer.preroll(context, matrix),
        }
        if self.caches_subtree() {
            if let Some(raster_cache) = context.raster_cache.as_deref_mut() {
                raster_cache.prepare_layer(self, matrix);
            }
        }
    }

    pub fn paint(&self, context: &mut PaintContext<'_>) {
        if self.caches_subtree()
            && context
                .raster_cache
                .is_some_and(|raster_cache| raster_cache.draw_layer(self, context.canvas))
        {
            return;
        }
        match self {
            Layer::Container(layer) => layer.paint_children(context),
            Layer::Transform(layer) => layer.paint(context),
            Layer::Picture(layer) => layer.paint(context),
        }
    }
}

pub struct ContainerLayer {
    state: LayerState,
    children: Vec<Layer>,
    cache_subtree: bool,
}

impl Default for ContainerLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerLayer {
    pub fn new() -> Self {
        Self {
            state: LayerState::new(),
            children: Vec::new(),
            cache_subtree: false,
        }
    }

    /// Paint the whole subtree from one raster cache entry when available.
    pub fn with_cached_subtree(mut self) -> Self {
        self.cache_subtree = true;
        self
    }

    pub fn add(&mut self, layer: impl Into<Layer>) {
        self.children.push(layer.into());
    }

    pub fn children(&self) -> &[Layer] {
        &self.children
    }

    fn preroll(&mut self, context: &mut PrerollContext<'_>, matrix: &Matrix) {
        self.state.paint_bounds = self.preroll_children(context, matrix);
    }

    fn preroll_children(&mut self, context: &mut PrerollContext<'_>, matrix: &Matrix) -> Rect {
        let mut child_paint_bounds = Rect::EMPTY;
        for child in &mut self.children {
            child.preroll(context, matrix);
            child_paint_bounds = child_paint_bounds.join(&child.paint_bounds());
        }
        child_paint_bounds
    }

    fn paint_children(&self, context: &mut PaintContext<'_>) {
        for child in &self.children {
            if child.needs_painting() {
                child.paint(context);
            }
        }
    }
}

pub struct TransformLayer {
    state: LayerState,
    transform: Matrix,
    container: ContainerLayer,
}

impl TransformLayer {
    pub fn new(transform: Matrix) -> Self {
        Self {
            state: LayerState::new(),
            transform,
            container: ContainerLayer::new(),
        }
    }

    pub fn transform(&self) -> Matrix {
        self.transform
    }

    pub fn add(&mut self, layer: impl Into<Layer>) {
        self.container.add(layer);
    }

    pub fn container_mut(&mut self) -> &mut ContainerLayer {
        &mut self.container
    }

    fn preroll(&mut self, context: &mut PrerollContext<'_>, matrix: &Matrix) {
        let child_matrix = matrix.pre_concat(&self.transform);
        let previous_cull_rect = context.cull_rect;
        context.cull_rect = match self.transform.invert() {
            Some(inverse) => inverse.map_rect(&previous_cull_rect),
            None => Rect::EMPTY,
        };
        let child_paint_bounds = self.container.preroll_children(context, &child_matrix);
        self.state.paint_bounds = self.transform.map_rect(&child_paint_bounds);
        context.cull_rect = previous_cull_rect;
    }

    fn paint(&self, context: &mut PaintContext<'_>) {
        context.canvas.save();
        context.canvas.concat(&self.transform);
        self.container.paint_children(context);
        context.canvas.restore();
    }
}

pub struct PictureLayer {
    state: LayerState,
    offset: Point,
    picture: Arc<Picture>,
    is_complex: bool,
    will_change: bool,
}

impl PictureLayer {
    pub fn new(offset: Point, picture: Arc<Picture>, is_complex: bool, will_change: bool) -> Self {
        Self {
            state: LayerState::new(),
            offset,
            picture,
            is_complex,
            will_change,
        }
    }

    pub fn picture(&self) -> &Arc<Picture> {
        &self.picture
    }

    fn preroll(&mut self, context: &mut PrerollContext<'_>, matrix: &Matrix) {
        if let Some(raster_cache) = context.raster_cache.as_deref_mut() {
            let ctm = matrix.pre_translate(self.offset.x, self.offset.y);
            raster_cache.prepare_picture(&self.picture, self.is_complex, self.will_change, &ctm);
        }
        self.state.paint_bounds = self
            .picture
            .cull_rect()
            .offset(self.offset.x, self.offset.y);
    }

    fn paint(&self, context: &mut PaintContext<'_>) {
        context.canvas.save();
        context.canvas.translate(self.offset.x, self.offset.y);
        let drawn_from_cache = context
            .raster_cache
            .is_some_and(|raster_cache| raster_cache.draw_picture(&self.picture, context.canvas));
        if !drawn_from_cache {
            self.picture.playback(context.canvas);
        }
        context.canvas.restore();
    }
}

impl From<ContainerLayer> for Layer {
    fn from(layer: ContainerLayer) -> Self {
        Layer::Container(layer)
    }
}

impl From<TransformLayer> for Layer {
    fn from(layer: TransformLayer) -> Self {
        Layer::Transform(layer)
    }
}

impl From<PictureLayer> for Layer {
    fn from(layer: PictureLayer) -> Self {
        Layer::Picture(layer)
    }
}
