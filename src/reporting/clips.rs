// Event clips: for every observation of a selected event, the frame is cropped
// to the observed bounding box (grown by the pad and clamped to the frame) and
// saved as a PNG named `event<id>_frame<n>.png`.

use crate::core_modules::event::EventId;
use crate::core_modules::geometry::BoundingBox;
use crate::error::{EventError, Result};
use image::{ExtendedColorType, ImageEncoder, RgbImage, codecs::png::PngEncoder, imageops};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which events get clips written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClipSelection {
    #[default]
    None,
    All,
    Events(BTreeSet<EventId>),
}

impl ClipSelection {
    pub fn includes(&self, id: EventId) -> bool {
        match self {
            ClipSelection::None => false,
            ClipSelection::All => true,
            ClipSelection::Events(ids) => ids.contains(&id),
        }
    }
}

impl FromStr for ClipSelection {
    type Err = EventError;

    /// `none`, `all`, or a comma-separated list of event ids.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" => Ok(ClipSelection::None),
            "all" => Ok(ClipSelection::All),
            list => list
                .split(',')
                .map(|t| {
                    t.trim()
                        .parse::<EventId>()
                        .map_err(|_| EventError::Configuration(format!("'{t}' is not an event id")))
                })
                .collect::<Result<BTreeSet<_>>>()
                .map(ClipSelection::Events),
        }
    }
}

/// One cropped observation, held until its event is reported.
#[derive(Debug, Clone)]
pub struct Clip {
    pub frame_num: u32,
    pub image: RgbImage,
}

impl Clip {
    pub fn crop(frame_num: u32, frame: &RgbImage, bbox: &BoundingBox, pad: u32) -> Option<Self> {
        let (w, h) = frame.dimensions();
        let area = bbox.clamped(w, h)?.padded(pad, w, h);
        let image = imageops::crop_imm(frame, area.left, area.top, area.width(), area.height()).to_image();
        Some(Self { frame_num, image })
    }

    pub fn file_name(&self, event: EventId) -> String {
        format!("event{event}_frame{}.png", self.frame_num)
    }
}

pub fn save_png(path: &Path, image: &RgbImage) -> Result<()> {
    let file = File::create(path).map_err(|e| EventError::io(path, e))?;
    let encoder = PngEncoder::new(BufWriter::new(file));
    encoder
        .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .map_err(|source| EventError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes every clip of `event` into `dir` and returns the paths.
pub fn write_clips(dir: &Path, event: EventId, clips: &[Clip]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(clips.len());
    for clip in clips {
        let path = dir.join(clip.file_name(event));
        save_png(&path, &clip.image)?;
        written.push(path);
    }
    Ok(written)
}
