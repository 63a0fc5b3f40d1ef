use anyhow::{Result, bail};
use image::{GrayImage, Luma, RgbaImage};
use imageproc::contours::{BorderType, find_contours};
use serde::Deserialize;
use tracing::{debug, info};

use crate::bubble::{BBoxPx, Point, Region};

use super::geom::{polygon_area, polygon_extent};

pub const DEFAULT_THRESHOLD: u8 = 150;
pub const DEFAULT_MIN_REGION_AREA: f32 = 100.0;

/// Which side of the threshold counts as foreground in the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Pixels at or below the threshold (ink on paper).
    #[default]
    Dark,
    /// Pixels above the threshold.
    Bright,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub threshold: u8,
    pub min_region_area: f32,
    pub polarity: Polarity,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_region_area: DEFAULT_MIN_REGION_AREA,
            polarity: Polarity::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionDetector {
    config: DetectorConfig,
}

impl RegionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Finds bubble candidates as the outermost contours of the thresholded
    /// mask. Holes and anything nested inside them are ignored. Regions come
    /// back in scan order.
    pub fn detect(&self, image: &RgbaImage) -> Result<Vec<Region>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            bail!("cannot detect regions in an empty image ({}x{})", width, height);
        }

        let luma = luminance(image);
        let mask = binarize(&luma, self.config.threshold, self.config.polarity);

        let mut regions = Vec::new();
        for contour in find_contours::<u32>(&mask) {
            if !matches!(contour.border_type, BorderType::Outer) || contour.parent.is_some() {
                continue;
            }
            let points: Vec<Point> = contour
                .points
                .iter()
                .map(|point| Point::new(point.x as f32, point.y as f32))
                .collect();
            let area = polygon_area(&points);
            if area < self.config.min_region_area {
                debug!("dropping contour with area {:.1}", area);
                continue;
            }
            let Some(extent) = polygon_extent(&points) else {
                continue;
            };
            // Contour points are pixel centres, so the box spans max - min + 1.
            let bbox = BBoxPx::new(
                extent.min_x as u32,
                extent.min_y as u32,
                (extent.max_x - extent.min_x) as u32 + 1,
                (extent.max_y - extent.min_y) as u32 + 1,
            );
            regions.push(Region::new(bbox)?.with_contour(points));
        }

        info!("detected {} region(s)", regions.len());
        Ok(regions)
    }
}

/// Rec. 601 luma of an RGBA image, with alpha composited over white.
pub fn luminance(image: &RgbaImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

pub fn binarize(image: &GrayImage, threshold: u8, polarity: Polarity) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        let foreground = match polarity {
            Polarity::Bright => pixel[0] > threshold,
            Polarity::Dark => pixel[0] <= threshold,
        };
        pixel[0] = if foreground { 255 } else { 0 };
    }
    output
}
