// Multi-scale invariant summaries ("jets") per colour channel. Each channel is
// blurred at sigma 1, 2, 4 and 8; neighbouring scales are subtracted to give
// three difference-of-Gaussians bands. Every band is summarised by its mean,
// the mean of its positive responses and the mean of its negative responses,
// taken over the pixels inside the mask. A channel that is constant inside the
// mask has no band energy and yields exact zeros.

use image::{GrayImage, ImageBuffer, Luma, RgbImage, imageops};

const SCALES: [f32; 4] = [1.0, 2.0, 4.0, 8.0];
const STATS_PER_BAND: usize = 3;

pub const JET_LEN: usize = 3 * (SCALES.len() - 1) * STATS_PER_BAND;

type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Jet descriptor of a crop: for R, G, B in turn, three bands of
/// (mean, positive mean, negative mean).
pub fn jet(crop: &RgbImage, mask: Option<&GrayImage>) -> Vec<f64> {
    let (w, h) = crop.dimensions();
    let inside = |x: u32, y: u32| mask.is_none_or(|m| m.get_pixel(x, y)[0] != 0);
    let mut out = Vec::with_capacity(JET_LEN);

    for channel in 0..3 {
        if is_flat(crop, channel, &inside) {
            out.extend([0.0; JET_LEN / 3]);
            continue;
        }
        let plane: FloatImage =
            ImageBuffer::from_fn(w, h, |x, y| Luma([crop.get_pixel(x, y)[channel] as f32]));
        let blurred: Vec<FloatImage> = SCALES.iter().map(|&s| imageops::blur(&plane, s)).collect();

        for pair in blurred.windows(2) {
            let (mut sum, mut pos_sum, mut neg_sum) = (0.0f64, 0.0f64, 0.0f64);
            let (mut n, mut pos_n, mut neg_n) = (0usize, 0usize, 0usize);
            for y in 0..h {
                for x in 0..w {
                    if !inside(x, y) {
                        continue;
                    }
                    let d = (pair[0].get_pixel(x, y)[0] - pair[1].get_pixel(x, y)[0]) as f64;
                    sum += d;
                    n += 1;
                    if d > 0.0 {
                        pos_sum += d;
                        pos_n += 1;
                    } else if d < 0.0 {
                        neg_sum += d;
                        neg_n += 1;
                    }
                }
            }
            let mean = |s: f64, c: usize| if c > 0 { s / c as f64 } else { 0.0 };
            out.extend([mean(sum, n), mean(pos_sum, pos_n), mean(neg_sum, neg_n)]);
        }
    }
    out
}

fn is_flat(crop: &RgbImage, channel: usize, inside: &impl Fn(u32, u32) -> bool) -> bool {
    let mut values = crop
        .enumerate_pixels()
        .filter(|(x, y, _)| inside(*x, *y))
        .map(|(_, _, p)| p[channel]);
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_crop_has_no_band_energy() {
        let crop = RgbImage::from_pixel(16, 16, Rgb([30, 60, 90]));
        let j = jet(&crop, None);
        assert_eq!(j.len(), JET_LEN);
        assert!(j.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn texture_outside_the_mask_is_ignored() {
        let crop = RgbImage::from_fn(16, 16, |x, _| if x < 8 { Rgb([40, 40, 40]) } else { Rgb([200, 10, 90]) });
        let mask = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 255 } else { 0 }]));
        assert!(jet(&crop, Some(&mask)).iter().all(|&v| v == 0.0));
        assert!(jet(&crop, None).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn a_bright_spot_excites_the_fine_band() {
        let crop = RgbImage::from_fn(16, 16, |x, y| {
            if (7..9).contains(&x) && (7..9).contains(&y) { Rgb([255, 0, 0]) } else { Rgb([0, 0, 0]) }
        });
        let j = jet(&crop, None);
        // Red channel, finest band: positive responses at the spot.
        assert!(j[1] > 1.0);
        // Blue channel stays silent.
        assert!(j[18..].iter().all(|&v| v == 0.0));
    }
}
