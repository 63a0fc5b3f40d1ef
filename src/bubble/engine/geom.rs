use anyhow::{Result, anyhow};
use image::RgbaImage;

use crate::bubble::{BBoxPx, Point};

impl BBoxPx {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x as f32 + self.w as f32 * 0.5,
            self.y as f32 + self.h as f32 * 0.5,
        )
    }

    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x as f32
            && point.y >= self.y as f32
            && point.x <= self.right() as f32
            && point.y <= self.bottom() as f32
    }

    pub fn contains(&self, other: &BBoxPx) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &BBoxPx) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Axis-aligned extent of a float polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

pub fn polygon_extent(points: &[Point]) -> Option<Extent> {
    let first = points.first()?;
    let mut extent = Extent {
        min_x: first.x,
        min_y: first.y,
        max_x: first.x,
        max_y: first.y,
    };
    for point in &points[1..] {
        extent.min_x = extent.min_x.min(point.x);
        extent.min_y = extent.min_y.min(point.y);
        extent.max_x = extent.max_x.max(point.x);
        extent.max_y = extent.max_y.max(point.y);
    }
    Some(extent)
}

/// Bounding box of a polygon in pixel space. Degenerate polygons get a
/// 1px minimum so the result is always a usable region.
pub fn polygon_bbox(points: &[Point]) -> Option<BBoxPx> {
    let extent = polygon_extent(points)?;
    let x = extent.min_x.max(0.0).floor();
    let y = extent.min_y.max(0.0).floor();
    let w = (extent.max_x.ceil() - x).max(1.0);
    let h = (extent.max_y.ceil() - y).max(1.0);
    Some(BBoxPx::new(x as u32, y as u32, w as u32, h as u32))
}

pub fn bbox_polygon(bbox: &BBoxPx) -> [Point; 4] {
    let x1 = bbox.x as f32;
    let y1 = bbox.y as f32;
    let x2 = bbox.right() as f32;
    let y2 = bbox.bottom() as f32;
    [
        Point::new(x1, y1),
        Point::new(x2, y1),
        Point::new(x2, y2),
        Point::new(x1, y2),
    ]
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0f64;
    for (idx, a) in points.iter().enumerate() {
        let b = points[(idx + 1) % points.len()];
        twice += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    (twice.abs() * 0.5) as f32
}

pub fn polygon_center(points: &[Point]) -> Option<Point> {
    let extent = polygon_extent(points)?;
    Some(Point::new(
        (extent.min_x + extent.max_x) * 0.5,
        (extent.min_y + extent.max_y) * 0.5,
    ))
}

/// Signed horizontal distance from the right edge of `left` to the left
/// edge of `right`. Negative when they overlap.
pub fn horizontal_gap(left: &[Point], right: &[Point]) -> f32 {
    match (polygon_extent(left), polygon_extent(right)) {
        (Some(a), Some(b)) => b.min_x - a.max_x,
        _ => f32::INFINITY,
    }
}

pub fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

pub fn center_distance(a: &BBoxPx, b: &BBoxPx) -> f32 {
    distance(a.center(), b.center())
}

/// Rotates `point` counter-clockwise (as seen on screen) by `degrees`
/// around `center`.
pub fn rotate_point(point: Point, center: Point, degrees: f32) -> Point {
    let theta = degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let dx = point.x - center.x;
    let dy = point.y - center.y;
    Point::new(
        center.x + dx * cos + dy * sin,
        center.y - dx * sin + dy * cos,
    )
}

pub fn rotate_polygon(points: &[Point], center: Point, degrees: f32) -> Vec<Point> {
    points
        .iter()
        .map(|point| rotate_point(*point, center, degrees))
        .collect()
}

pub fn iou(a: &BBoxPx, b: &BBoxPx) -> f32 {
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = a.right().min(b.right());
    let iy2 = a.bottom().min(b.bottom());

    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }
    let inter = (ix2 - ix1) as f32 * (iy2 - iy1) as f32;
    let area_a = a.area() as f32;
    let area_b = b.area() as f32;
    inter / (area_a + area_b - inter).max(1.0)
}

pub fn union_bbox(a: &BBoxPx, b: &BBoxPx) -> BBoxPx {
    let x1 = a.x.min(b.x);
    let y1 = a.y.min(b.y);
    let x2 = a.right().max(b.right());
    let y2 = a.bottom().max(b.bottom());
    BBoxPx {
        x: x1,
        y: y1,
        w: x2 - x1,
        h: y2 - y1,
    }
}

/// Clips a signed rectangle to the image bounds.
pub fn clip_rect(x: i64, y: i64, w: i64, h: i64, width: u32, height: u32) -> Option<BBoxPx> {
    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + w).min(width as i64);
    let y2 = (y + h).min(height as i64);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(BBoxPx::new(
        x1 as u32,
        y1 as u32,
        (x2 - x1) as u32,
        (y2 - y1) as u32,
    ))
}

pub fn crop(image: &RgbaImage, bbox: &BBoxPx) -> Result<RgbaImage> {
    let clipped = clip_rect(
        bbox.x as i64,
        bbox.y as i64,
        bbox.w as i64,
        bbox.h as i64,
        image.width(),
        image.height(),
    )
    .ok_or_else(|| anyhow!("region {:?} lies outside the image", bbox))?;
    Ok(image::imageops::crop_imm(image, clipped.x, clipped.y, clipped.w, clipped.h).to_image())
}
