use image::{Rgba, RgbaImage};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use imageproc::hough::{LineDetectionOptions, detect_lines};
use tracing::debug;

use super::detect::luminance;

const SMOOTH_DIAMETER: u32 = 9;
const SMOOTH_SIGMA_COLOR: f32 = 75.0;
const SMOOTH_SIGMA_SPACE: f32 = 75.0;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const HOUGH_VOTE_THRESHOLD: u32 = 100;
const HOUGH_SUPPRESSION_RADIUS: u32 = 8;
const DESKEW_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Optional passes run on a page before detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessConfig {
    pub smooth: bool,
    pub deskew: bool,
}

impl PreprocessConfig {
    pub fn is_noop(&self) -> bool {
        !self.smooth && !self.deskew
    }
}

pub fn apply(config: &PreprocessConfig, image: RgbaImage) -> RgbaImage {
    let mut image = image;
    if config.smooth {
        image = smooth_distortion(&image);
    }
    if config.deskew {
        image = deskew(&image);
    }
    image
}

/// Edge-preserving blur that flattens compression noise before thresholding.
pub fn smooth_distortion(image: &RgbaImage) -> RgbaImage {
    bilateral_filter(image, SMOOTH_DIAMETER, SMOOTH_SIGMA_COLOR, SMOOTH_SIGMA_SPACE)
}

fn bilateral_filter(
    image: &RgbaImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let radius = (diameter / 2).max(1) as i32;
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = dx * dx + dy * dy;
            if r2 <= radius * radius {
                window.push((dx, dy, (r2 as f32 * space_coeff).exp()));
            }
        }
    }
    // Colour distance is the L1 distance over RGB, so at most 3 * 255.
    let color_weights: Vec<f32> = (0..=3 * 255u32)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let mut out = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let center = image.get_pixel(x, y);
            let mut sums = [0f32; 3];
            let mut total = 0f32;
            for &(dx, dy, space_weight) in &window {
                let nx = (x as i32 + dx).clamp(0, max_x) as u32;
                let ny = (y as i32 + dy).clamp(0, max_y) as u32;
                let neighbour = image.get_pixel(nx, ny);
                let distance: u32 = (0..3)
                    .map(|c| (neighbour[c] as i32 - center[c] as i32).unsigned_abs())
                    .sum();
                let weight = space_weight * color_weights[distance as usize];
                for (c, sum) in sums.iter_mut().enumerate() {
                    *sum += weight * neighbour[c] as f32;
                }
                total += weight;
            }
            let channel = |c: usize| (sums[c] / total).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x, y, Rgba([channel(0), channel(1), channel(2), center[3]]));
        }
    }
    out
}

/// Rotates the page so the first strong line found by Hough voting becomes
/// horizontal. Pages without such a line come back unchanged.
pub fn deskew(image: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return image.clone();
    }
    let edges = canny(&luminance(image), CANNY_LOW, CANNY_HIGH);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: HOUGH_VOTE_THRESHOLD,
            suppression_radius: HOUGH_SUPPRESSION_RADIUS,
        },
    );
    let Some(first) = lines.first() else {
        debug!("deskew: no dominant line, page left as is");
        return image.clone();
    };

    let angle = skew_angle(first.angle_in_degrees as f32);
    if angle.abs() < f32::EPSILON {
        return image.clone();
    }
    debug!(
        "deskew: {} line(s), rotating by {:.1} degrees",
        lines.len(),
        angle
    );
    // Positive angles turn the page counter-clockwise.
    rotate_about_center(
        image,
        -angle.to_radians(),
        Interpolation::Bilinear,
        DESKEW_FILL,
    )
}

/// Maps the angle of a line's normal to the rotation applied, in [0, 180).
pub fn skew_angle(normal_degrees: f32) -> f32 {
    let angle = normal_degrees - 90.0;
    if angle < 0.0 { angle + 180.0 } else { angle }
}
