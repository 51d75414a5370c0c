//! Compositor crate root.
//!
//! Layer trees are built on the UI context and handed to the raster context,
//! where a [`CompositorContext`] prerolls and paints them onto a [`Surface`]
//! frame. Pictures and layer subtrees that keep reappearing are memoized by the
//! [`RasterCache`]. Platform views participate through [`ExternalViewEmbedder`].
//!
//! Module map:
//! - `geometry`: sizes, rects and affine matrices.
//! - `picture`/`canvas`: recorded draw ops and the software rasterizer.
//! - `layer`/`layer_tree`: retained scene and its preroll/paint passes.
//! - `raster_cache`/`compositor_context`: frame scope and memoization.
//! - `surface`/`view_embedder`: render targets and platform view hooks.

mod canvas;
mod compositor_context;
mod geometry;
mod layer;
mod layer_tree;
mod picture;
mod raster_cache;
mod surface;
mod view_embedder;

pub use canvas::Canvas;
pub use compositor_context::{CompositorContext, RasterStatus, ScopedFrame, Stopwatch};
pub use geometry::{GIANT_RECT, IRect, ISize, Matrix, Point, Rect};
pub use layer::{ContainerLayer, Layer, PaintContext, PictureLayer, PrerollContext, TransformLayer};
pub use layer_tree::LayerTree;
pub use picture::{Color, DrawOp, Picture, PictureRecorder};
pub use raster_cache::{
    DEFAULT_ACCESS_THRESHOLD, DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME, RasterCache, RasterCacheKey,
    RasterCacheResult,
};
pub use surface::{
    GpuBackend, GpuContext, PresentedFrames, SoftwareSurface, SubmitCallback, Surface, SurfaceFrame,
    UnknownGpuBackend,
};
pub use view_embedder::{CallbackViewEmbedder, EndFrameCallback, ExternalViewEmbedder, PostPrerollResult};
