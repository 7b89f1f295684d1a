// THEORY:
// Feature extraction turns a finalized event's last observation into numeric
// descriptors for a downstream classifier. It only ever sees a consistent
// snapshot: a copied bounding box plus shared, immutable frame data. It never
// reads a live event, so it can run on any thread at any time.
//
// Key architectural principles:
// 1.  **One Crop, Many Descriptors**: The bounding box is clamped to the frame and
//     cropped once. Every descriptor group works on that crop (and the matching
//     crop of the previous frame and of the mask).
// 2.  **Minimum Support**: Crops smaller than 8x8 cannot carry a fine HOG grid or
//     a flow window, so they are rejected with `ResourceExhaustion` instead of
//     producing undefined gradients.
// 3.  **Degenerate Input, Zero Output**: Flat regions produce all-zero histograms,
//     and motion groups without a previous frame are all zeros.
// 4.  **No Similarity Here**: Comparing descriptors is the classifier's job.

pub mod hog;
pub mod invariants;
pub mod optical_flow;

use crate::core_modules::event::EventId;
use crate::core_modules::geometry::BoundingBox;
use crate::core_modules::image_data::{ImageData, luma};
use crate::error::{EventError, Result};
use image::{GrayImage, RgbImage, imageops};
use std::fmt;
use std::str::FromStr;

/// Smallest crop side, in pixels, that descriptors are computed for.
pub const MIN_KERNEL_SUPPORT: u32 = 8;

/// The descriptor groups a collection can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureType {
    Hog3,
    Hog8,
    Mbh3,
    Mbh8,
    Jet,
}

impl FeatureType {
    pub const ALL: [FeatureType; 5] = [
        FeatureType::Hog3,
        FeatureType::Hog8,
        FeatureType::Mbh3,
        FeatureType::Mbh8,
        FeatureType::Jet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Hog3 => "HOG3",
            FeatureType::Hog8 => "HOG8",
            FeatureType::Mbh3 => "MBH3",
            FeatureType::Mbh8 => "MBH8",
            FeatureType::Jet => "JET",
        }
    }

    /// Number of values in this group.
    pub fn dimension(&self) -> usize {
        match self {
            FeatureType::Hog3 => hog::descriptor_len(3),
            FeatureType::Hog8 => hog::descriptor_len(8),
            FeatureType::Mbh3 => 2 * hog::descriptor_len(3),
            FeatureType::Mbh8 => 2 * hog::descriptor_len(8),
            FeatureType::Jet => invariants::JET_LEN,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        FeatureType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EventError::Configuration(format!("unknown feature type '{s}'")))
    }
}

/// Descriptor groups of one event, in the order they were requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureDescriptor {
    pub groups: Vec<(FeatureType, Vec<f64>)>,
}

impl FeatureDescriptor {
    pub fn get(&self, feature: FeatureType) -> Option<&[f64]> {
        self.groups
            .iter()
            .find(|(t, _)| *t == feature)
            .map(|(_, v)| v.as_slice())
    }

    /// All groups back to back.
    pub fn concatenated(&self) -> Vec<f64> {
        self.groups.iter().flat_map(|(_, v)| v.iter().copied()).collect()
    }

    pub fn is_zero(&self) -> bool {
        self.groups.iter().all(|(_, v)| v.iter().all(|x| *x == 0.0))
    }
}

/// A configured set of descriptor groups.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    types: Vec<FeatureType>,
    /// Snap gradient orientations to the nearest bin instead of interpolating.
    pub snap_orientations: bool,
    /// L2-normalise each histogram block.
    pub normalize: bool,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            types: FeatureType::ALL.to_vec(),
            snap_orientations: false,
            normalize: true,
        }
    }
}

impl FeatureCollection {
    pub fn new(types: Vec<FeatureType>) -> Self {
        Self {
            types,
            ..Self::default()
        }
    }

    pub fn types(&self) -> &[FeatureType] {
        &self.types
    }

    /// Computes every configured group for the crop of `frame` at `bbox`.
    pub fn extract(&self, event: EventId, bbox: BoundingBox, frame: &ImageData) -> Result<FeatureDescriptor> {
        let exhausted = |reason: String| EventError::ResourceExhaustion { event, reason };
        let area = bbox
            .clamped(frame.width(), frame.height())
            .ok_or_else(|| exhausted("bounding box lies outside the frame".to_string()))?;
        if area.width() < MIN_KERNEL_SUPPORT || area.height() < MIN_KERNEL_SUPPORT {
            return Err(exhausted(format!(
                "region {}x{} is below the {MIN_KERNEL_SUPPORT}x{MIN_KERNEL_SUPPORT} minimum support",
                area.width(),
                area.height()
            )));
        }

        let crop = crop_rgb(&frame.img, &area);
        let mask = frame
            .mask
            .as_deref()
            .filter(|m| m.dimensions() == frame.img.dimensions())
            .map(|m| crop_gray(m, &area));
        let prev = frame
            .prev_img
            .as_deref()
            .filter(|p| p.dimensions() == frame.img.dimensions())
            .map(|p| crop_rgb(p, &area));

        let appearance = hog::color_gradients(&crop, mask.as_ref());
        let motion = prev.as_ref().map(|p| {
            let flow = optical_flow::lucas_kanade(&luma_plane(p), &luma_plane(&crop), area.width(), area.height());
            (
                hog::scalar_gradients(&flow.u, flow.width, flow.height),
                hog::scalar_gradients(&flow.v, flow.width, flow.height),
            )
        });

        let mut groups = Vec::with_capacity(self.types.len());
        for &feature in &self.types {
            let values = match feature {
                FeatureType::Hog3 => self.hog(&appearance, 3),
                FeatureType::Hog8 => self.hog(&appearance, 8),
                FeatureType::Mbh3 | FeatureType::Mbh8 => {
                    let cells = if feature == FeatureType::Mbh3 { 3 } else { 8 };
                    match &motion {
                        Some((gu, gv)) => {
                            let mut v = self.hog(gu, cells);
                            v.extend(self.hog(gv, cells));
                            v
                        }
                        None => vec![0.0; feature.dimension()],
                    }
                }
                FeatureType::Jet => invariants::jet(&crop, mask.as_ref()),
            };
            groups.push((feature, values));
        }
        Ok(FeatureDescriptor { groups })
    }

    fn hog(&self, field: &hog::GradientField, cells: u32) -> Vec<f64> {
        hog::histogram(field, cells, self.snap_orientations, self.normalize)
    }
}

fn crop_rgb(img: &RgbImage, area: &BoundingBox) -> RgbImage {
    imageops::crop_imm(img, area.left, area.top, area.width(), area.height()).to_image()
}

fn crop_gray(img: &GrayImage, area: &BoundingBox) -> GrayImage {
    imageops::crop_imm(img, area.left, area.top, area.width(), area.height()).to_image()
}

fn luma_plane(img: &RgbImage) -> Vec<f64> {
    img.pixels().map(|p| luma(p.0)).collect()
}
