/// Intrinsic page size in logical units, as reported by the rendering engine
/// at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageExtent {
    pub width: f32,
    pub height: f32,
}

impl PageExtent {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Camera over the current page: origin in intrinsic page units, scale in
/// container pixels per page unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceTransform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSize {
    pub width: u32,
    pub height: u32,
}

/// Scale at which a page fits the container on both axes.
pub fn base_fit_scale(extent: PageExtent, container: ContainerSize) -> f32 {
    if extent.width <= 0.0 || extent.height <= 0.0 {
        return 1.0;
    }
    (container.width / extent.width).min(container.height / extent.height)
}

pub fn device_size(extent: PageExtent, scale: f32) -> DeviceSize {
    DeviceSize {
        width: (extent.width * scale).round().max(1.0) as u32,
        height: (extent.height * scale).round().max(1.0) as u32,
    }
}

/// Reduces `scale` so that no page dimension exceeds `max_page_pixels`.
/// Computed once across all pages after load; never scales up.
pub fn capped_scale(extents: &[PageExtent], scale: f32, max_page_pixels: Option<f32>) -> f32 {
    let Some(cap) = max_page_pixels else {
        return scale;
    };
    if cap <= 0.0 {
        return scale;
    }
    let largest = extents
        .iter()
        .map(|extent| extent.width.max(extent.height))
        .fold(0.0_f32, f32::max);
    if largest * scale > cap {
        cap / largest
    } else {
        scale
    }
}
