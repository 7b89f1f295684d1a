// This file is an example of how to drive the `abyss_vision` library.
// It renders a short synthetic clip (one object drifting across a dark
// background, one that blinks in place), segments it with the reference
// region grower, and runs the result through the parallel pipeline.
//
// Usage: abyss_vision [OUTPUT_DIR] [PARAMS_JSON]

use abyss_vision::core_modules::geometry::Vector2D;
use abyss_vision::core_modules::image_data::ImageData;
use abyss_vision::core_modules::region::region_builder::grow_from_seed;
use abyss_vision::core_modules::winner::{AttentionPoint, Detection};
use abyss_vision::reporting::clips::ClipSelection;
use abyss_vision::reporting::{ReportConfig, Reporter};
use abyss_vision::{DetectionParameters, EventPipeline, FrameReport, ParallelPipeline, TrackingMode};
use anyhow::Context;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;
const FRAMES: u32 = 24;
const FOREGROUND_LEVEL: u8 = 100;

fn render(frame_num: u32) -> RgbImage {
    let drift_x = 10 + frame_num * 4;
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let drifting = (drift_x..drift_x + 14).contains(&x) && (50..62).contains(&y);
        let blinking = frame_num % 6 < 2 && (120..126).contains(&x) && (20..26).contains(&y);
        if drifting {
            Rgb([200, 220, 180])
        } else if blinking {
            Rgb([160, 160, 240])
        } else {
            Rgb([8, 16 + (y / 8) as u8, 30])
        }
    })
}

/// Reference segmentation: every connected bright blob becomes one detection.
fn segment(img: &RgbImage) -> Vec<Detection> {
    let intensity = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let p = img.get_pixel(x, y);
        Luma([((p[0] as u32 + p[1] as u32 + p[2] as u32) / 3) as u8])
    });
    let mut foreground = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Luma([if intensity.get_pixel(x, y)[0] > FOREGROUND_LEVEL { 255 } else { 0 }])
    });

    let mut detections = Vec::new();
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            if foreground.get_pixel(x, y)[0] == 0 {
                continue;
            }
            let Some(region) = grow_from_seed(&foreground, &intensity, (x, y)) else {
                continue;
            };
            for &(px, py) in &region.pixels {
                foreground.put_pixel(px, py, Luma([0]));
            }
            detections.push(Detection {
                point: AttentionPoint {
                    position: Vector2D::new(region.centroid.x, region.centroid.y),
                    saliency: region.intensity.mean / 255.0,
                    rank: detections.len() as u32,
                },
                region: Some(region),
            });
        }
    }
    detections
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let output_dir = args.next().unwrap_or_else(|| "abyss_output".to_string());
    let params = match args.next() {
        Some(path) => DetectionParameters::load(&path).with_context(|| format!("loading {path}"))?,
        None => DetectionParameters {
            tracking_mode: TrackingMode::KalmanFilterHough,
            gating_radius: 12.0,
            event_expiration_frames: 3,
            min_event_frames: 3,
            save_event_features: true,
            pad_events: 4,
            ..DetectionParameters::default()
        },
    };

    let pipeline = EventPipeline::new(&params, WIDTH, HEIGHT).context("configuring the pipeline")?;
    let mut report_config = ReportConfig::new(&output_dir);
    report_config.clips = ClipSelection::All;
    report_config.pad_events = params.pad_events;
    let reporter = Reporter::new(report_config)?;
    let engine = ParallelPipeline::new(pipeline, reporter);

    let mut previous: Option<Arc<RgbImage>> = None;
    for frame_num in 1..=FRAMES {
        let img = render(frame_num);
        let detections = segment(&img);
        let mut frame = ImageData::new(frame_num, img).with_timecode(format!("00:00:{:02}", frame_num));
        if let Some(prev) = previous.take() {
            frame = frame.with_previous(prev);
        }
        previous = Some(Arc::clone(&frame.img));

        match engine.process_frame(frame, detections).await? {
            FrameReport::Activity(data) if !data.finalized.is_empty() => {
                for event in &data.finalized {
                    info!(
                        event = event.id(),
                        class = %event.classification(),
                        frames = event.span(),
                        "event finalized"
                    );
                }
            }
            _ => {}
        }
    }

    let paths = engine.finish().await?;
    let stats = engine.statistics().await;
    println!("abyss_vision example run");
    println!("  frames processed: {}", stats.frames_processed);
    println!("  events reported:  {}", stats.events_finalized);
    println!("  event set:        {}", paths.event_set.display());
    println!("  summary:          {}", paths.summary.display());
    Ok(())
}
