use compositor::ISize;

/// Physical dimensions of the view the engine renders into.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub device_pixel_ratio: f64,
    pub physical_width: f64,
    pub physical_height: f64,
    pub view_id: i64,
}

impl ViewportMetrics {
    pub fn new(device_pixel_ratio: f64, physical_width: f64, physical_height: f64) -> Self {
        Self {
            device_pixel_ratio,
            physical_width,
            physical_height,
            view_id: 0,
        }
    }

    /// Metrics with a non-positive ratio, width or height carry no usable
    /// frame size and are ignored.
    pub fn is_valid(&self) -> bool {
        self.device_pixel_ratio > 0.0 && self.physical_width > 0.0 && self.physical_height > 0.0
    }

    pub fn frame_size(&self) -> ISize {
        ISize::new(self.physical_width as i32, self.physical_height as i32)
    }

    /// Whether switching from `self` to `other` changes the frame dimensions.
    pub fn dimensions_differ(&self, other: &ViewportMetrics) -> bool {
        self.physical_width != other.physical_width
            || self.physical_height != other.physical_height
            || self.device_pixel_ratio != other.device_pixel_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_components_are_invalid() {
        assert!(ViewportMetrics::new(0.8, 400.0, 200.0).is_valid());
        assert!(!ViewportMetrics::new(0.0, 400.0, 200.0).is_valid());
        assert!(!ViewportMetrics::new(0.8, 0.0, 200.0).is_valid());
        assert!(!ViewportMetrics::new(0.8, 400.0, 0.0).is_valid());
        assert!(!ViewportMetrics::new(-1.0, 400.0, 200.0).is_valid());
        assert_eq!(ViewportMetrics::new(1.0, 400.0, 200.0).frame_size(), ISize::new(400, 200));
    }
}
