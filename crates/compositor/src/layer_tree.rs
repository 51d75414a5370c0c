use crate::canvas::Canvas;
use crate::geometry::{GIANT_RECT, ISize, Matrix};
use crate::layer::{Layer, PaintContext, PrerollContext};
use crate::raster_cache::RasterCache;

/// One frame's scene: a root layer plus the size and pixel ratio it was built for.
pub struct LayerTree {
    root_layer: Option<Layer>,
    frame_size: ISize,
    device_pixel_ratio: f32,
}

impl LayerTree {
    pub fn new(frame_size: ISize, device_pixel_ratio: f32) -> Self {
        Self {
            root_layer: None,
            frame_size,
            device_pixel_ratio,
        }
    }

    pub fn frame_size(&self) -> ISize {
        self.frame_size
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn root_layer(&self) -> Option<&Layer> {
        self.root_layer.as_ref()
    }

    pub fn set_root_layer(&mut self, root_layer: impl Into<Layer>) {
        self.root_layer = Some(root_layer.into());
    }

    pub fn preroll(&mut self, raster_cache: Option<&mut RasterCache>, root_transformation: &Matrix) {
        let Some(root_layer) = self.root_layer.as_mut() else {
            return;
        };
        let mut context = PrerollContext {
            raster_cache,
            cull_rect: GIANT_RECT,
            frame_device_pixel_ratio: self.device_pixel_ratio,
        };
        root_layer.preroll(&mut context, root_transformation);
    }

    pub fn paint(&self, canvas: &mut Canvas, raster_cache: Option<&RasterCache>) {
        let Some(root_layer) = self.root_layer.as_ref() else {
            return;
        };
        if root_layer.needs_painting() {
            root_layer.paint(&mut PaintContext {
                canvas,
                raster_cache,
            });
        }
    }
}
