use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::controller::PageChange;
use crate::error::ViewerError;
use crate::geometry::PageExtent;

pub const DEFAULT_WHOLE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Transport policy constants. The threshold and chunk size are empirical
/// tuning values carried as configuration, not derived.
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    pub whole_file_threshold: u64,
    pub chunk_size: usize,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            whole_file_threshold: DEFAULT_WHOLE_FILE_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncTiming {
    pub publish_window: Duration,
    pub frame_interval: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            publish_window: Duration::from_millis(50),
            frame_interval: Duration::from_millis(16),
        }
    }
}

pub type UrlRewriter = Arc<dyn Fn(Url) -> Url + Send + Sync>;
pub type WriteGate = Arc<dyn Fn() -> bool + Send + Sync>;
pub type NavigateHook = Arc<dyn Fn(usize) + Send + Sync>;
pub type RenderEndHook = Arc<dyn Fn(usize, PageExtent) + Send + Sync>;
pub type RenderErrorHook = Arc<dyn Fn(&ViewerError) + Send + Sync>;
pub type PageChangeHook = Arc<dyn Fn(PageChange) + Send + Sync>;

/// Resolved once at construction; everything is optional except the locator.
#[derive(Clone)]
pub struct ViewerConfig {
    pub url: Url,
    pub scale: f32,
    pub device_pixel_ratio: f32,
    pub max_density: Option<f32>,
    pub max_page_pixels: Option<f32>,
    pub preview: bool,
    pub preview_scale: f32,
    pub readonly: bool,
    pub rewrite_url: Option<UrlRewriter>,
    pub transport: TransportPolicy,
    pub timing: SyncTiming,
}

impl ViewerConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            scale: 1.5,
            device_pixel_ratio: 1.0,
            max_density: None,
            max_page_pixels: None,
            preview: true,
            preview_scale: 0.2,
            readonly: false,
            rewrite_url: None,
            transport: TransportPolicy::default(),
            timing: SyncTiming::default(),
        }
    }

    /// Device-pixel-ratio multiplier applied to rendered bitmaps, shared by
    /// the primary and preview surfaces.
    pub fn effective_density(&self) -> f32 {
        let ratio = if self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        };
        match self.max_density {
            Some(cap) if cap > 0.0 => ratio.min(cap),
            _ => ratio,
        }
    }
}

impl fmt::Debug for ViewerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerConfig")
            .field("url", &self.url.as_str())
            .field("scale", &self.scale)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("max_density", &self.max_density)
            .field("max_page_pixels", &self.max_page_pixels)
            .field("preview", &self.preview)
            .field("preview_scale", &self.preview_scale)
            .field("readonly", &self.readonly)
            .field("rewrite_url", &self.rewrite_url.is_some())
            .field("transport", &self.transport)
            .field("timing", &self.timing)
            .finish()
    }
}

/// Strategy callbacks injected at construction. The viewer calls these at the
/// points a collaborative layer hooks into: accepted local navigation,
/// primary render completion, surfaced render errors, and de-duplicated page
/// changes. `write_gate` is consulted per request, never cached.
#[derive(Clone, Default)]
pub struct ViewerHooks {
    pub on_navigate: Option<NavigateHook>,
    pub on_render_end: Option<RenderEndHook>,
    pub on_render_error: Option<RenderErrorHook>,
    pub on_page_change: Option<PageChangeHook>,
    pub write_gate: Option<WriteGate>,
}

impl ViewerHooks {
    pub fn navigate(&self, index: usize) {
        if let Some(hook) = &self.on_navigate {
            hook(index);
        }
    }

    pub fn render_end(&self, page_number: usize, extent: PageExtent) {
        if let Some(hook) = &self.on_render_end {
            hook(page_number, extent);
        }
    }

    pub fn render_error(&self, err: &ViewerError) {
        if let Some(hook) = &self.on_render_error {
            hook(err);
        }
    }

    pub fn page_change(&self, change: PageChange) {
        if let Some(hook) = &self.on_page_change {
            hook(change);
        }
    }
}

impl fmt::Debug for ViewerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerHooks")
            .field("on_navigate", &self.on_navigate.is_some())
            .field("on_render_end", &self.on_render_end.is_some())
            .field("on_render_error", &self.on_render_error.is_some())
            .field("on_page_change", &self.on_page_change.is_some())
            .field("write_gate", &self.write_gate.is_some())
            .finish()
    }
}
