// THEORY:
// `ImageData` is the frame context handed to the engine with every frame: the
// current image, the previous one (for motion features), and an optional
// foreground mask from the segmenter. The engine never decodes video itself;
// frames arrive already decoded as `image` buffers.

use image::{GrayImage, RgbImage};
use std::sync::Arc;

/// Timing information carried alongside a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata {
    /// Source timecode, e.g. `"00:01:02:03"`. Empty when unknown.
    pub timecode: String,
}

/// One decoded frame with its neighbours and mask.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub frame_num: u32,
    pub metadata: FrameMetadata,
    pub img: Arc<RgbImage>,
    pub prev_img: Option<Arc<RgbImage>>,
    /// Foreground mask, non-zero = object. Same size as `img`.
    pub mask: Option<Arc<GrayImage>>,
}

impl ImageData {
    pub fn new(frame_num: u32, img: RgbImage) -> Self {
        Self {
            frame_num,
            metadata: FrameMetadata::default(),
            img: Arc::new(img),
            prev_img: None,
            mask: None,
        }
    }

    pub fn with_previous(mut self, prev: Arc<RgbImage>) -> Self {
        self.prev_img = Some(prev);
        self
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(Arc::new(mask));
        self
    }

    pub fn with_timecode(mut self, timecode: impl Into<String>) -> Self {
        self.metadata.timecode = timecode.into();
        self
    }

    pub fn width(&self) -> u32 {
        self.img.width()
    }

    pub fn height(&self) -> u32 {
        self.img.height()
    }

    /// Standard deviation of the frame's luma.
    pub fn intensity_std_dev(&self) -> f64 {
        let n = (self.img.width() as f64) * (self.img.height() as f64);
        if n == 0.0 {
            return 0.0;
        }
        let (sum, sum_sq) = self.img.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
            let y = luma(p.0);
            (s + y, sq + y * y)
        });
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0).sqrt()
    }
}

/// Rec. 601 luma of an RGB pixel.
pub fn luma(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}
