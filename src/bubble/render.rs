use anyhow::{Context, Result, anyhow, bail};
use image::RgbaImage;
use std::sync::Arc;
use tiny_skia::{IntSize, Pixmap, Transform};
use tracing::debug;
use usvg::{Options, Tree, fontdb};

use super::engine::geom::union_bbox;
use super::{BBoxPx, LayoutLine, LayoutResult};

#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub text_color: String,
    pub fill_color: String,
    pub outline_color: String,
    pub outline_width: f32,
    pub stroke_color: Option<String>,
    pub stroke_width: f32,
    /// Space kept around each line's background patch.
    pub patch_padding: u32,
    pub draw_background: bool,
    pub draw_outline: bool,
    pub font_family: Option<String>,
    pub allow_overlap: bool,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            text_color: "#000000".to_string(),
            fill_color: "#ffffff".to_string(),
            outline_color: "#000000".to_string(),
            outline_width: 2.0,
            stroke_color: None,
            stroke_width: 0.0,
            patch_padding: 5,
            draw_background: true,
            draw_outline: false,
            font_family: None,
            allow_overlap: true,
        }
    }
}

/// Paints laid-out text back onto a page. Holds no per-page state, so one
/// compositor can serve every worker.
#[derive(Clone)]
pub struct Compositor {
    style: RenderStyle,
    database: Arc<fontdb::Database>,
}

impl Compositor {
    pub fn new(style: RenderStyle, database: Arc<fontdb::Database>) -> Self {
        Self { style, database }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Paints background patches, the outline and then the text of a single
    /// region. The buffer must be opaque.
    pub fn paint(
        &self,
        image: &mut RgbaImage,
        region: &BBoxPx,
        layout: &LayoutResult,
    ) -> Result<()> {
        self.paint_all(image, &[(*region, layout.clone())])
            .map(|_| ())
    }

    /// Paints regions in the given order. With `allow_overlap` off, a region
    /// whose footprint touches an earlier one fails the whole call before
    /// anything is drawn.
    pub fn paint_all(
        &self,
        image: &mut RgbaImage,
        items: &[(BBoxPx, LayoutResult)],
    ) -> Result<usize> {
        if image.width() == 0 || image.height() == 0 {
            bail!("cannot paint onto an empty image");
        }
        if !self.style.allow_overlap {
            check_overlaps(items, &self.style)?;
        }
        let drawable = items
            .iter()
            .filter(|(_, layout)| !layout.is_empty() || self.style.draw_outline)
            .count();
        if drawable == 0 {
            return Ok(0);
        }

        let svg = overlay_svg(image.width(), image.height(), items, &self.style);
        rasterize(image, &svg, &self.database)?;
        debug!("painted {} region(s)", drawable);
        Ok(drawable)
    }
}

/// Builds the SVG overlay for `items`. Later items are drawn over earlier
/// ones, and within an item the order is patches, outline, text.
pub fn overlay_svg(
    width: u32,
    height: u32,
    items: &[(BBoxPx, LayoutResult)],
    style: &RenderStyle,
) -> String {
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));

    for (region, layout) in items {
        svg.push_str("<g>");
        if style.draw_background {
            for line in &layout.lines {
                let (x, y, w, h) = patch_rect(line, layout.font_size, style.patch_padding);
                svg.push_str(&format!(
                    r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}"/>"#,
                    fill = escape_xml(&style.fill_color)
                ));
            }
        }
        if style.draw_outline {
            svg.push_str(&format!(
                r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="{stroke}" stroke-width="{sw}"/>"#,
                x = region.x,
                y = region.y,
                w = region.w,
                h = region.h,
                stroke = escape_xml(&style.outline_color),
                sw = style.outline_width
            ));
        }
        for line in &layout.lines {
            svg.push_str(&text_element(line, layout.font_size, style));
        }
        svg.push_str("</g>");
    }

    svg.push_str("</svg>");
    svg
}

fn text_element(line: &LayoutLine, font_size: u32, style: &RenderStyle) -> String {
    let mut attrs = format!(
        r#"x="{x}" y="{y}" font-size="{size}" fill="{fill}""#,
        x = line.x,
        y = line.y,
        size = font_size,
        fill = escape_xml(&style.text_color)
    );
    if let Some(family) = style.font_family.as_deref() {
        attrs.push_str(&format!(r#" font-family="{}""#, escape_xml(family)));
    }
    if let Some(stroke) = style.stroke_color.as_deref()
        && style.stroke_width > 0.0
    {
        attrs.push_str(&format!(
            r#" stroke="{}" stroke-width="{}" paint-order="stroke""#,
            escape_xml(stroke),
            style.stroke_width
        ));
    }
    format!("<text {}>{}</text>", attrs, escape_xml(&line.text))
}

/// Box behind one line: the measured text box grown by `padding`, with the
/// line's baseline as its lower text edge.
fn patch_rect(line: &LayoutLine, font_size: u32, padding: u32) -> (i64, i64, i64, i64) {
    let pad = padding as i64;
    (
        line.x as i64 - pad,
        line.y as i64 - font_size as i64 - pad,
        line.width as i64 + 2 * pad,
        font_size as i64 + 2 * pad,
    )
}

fn footprint(region: &BBoxPx, layout: &LayoutResult, style: &RenderStyle) -> Option<BBoxPx> {
    let mut area: Option<BBoxPx> = style.draw_outline.then_some(*region);
    for line in &layout.lines {
        let (x, y, w, h) = patch_rect(line, layout.font_size, style.patch_padding);
        let x1 = x.max(0);
        let y1 = y.max(0);
        let x2 = (x + w).max(x1 + 1);
        let y2 = (y + h).max(y1 + 1);
        let rect = BBoxPx::new(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32);
        area = Some(match area {
            Some(existing) => union_bbox(&existing, &rect),
            None => rect,
        });
    }
    area
}

fn check_overlaps(items: &[(BBoxPx, LayoutResult)], style: &RenderStyle) -> Result<()> {
    let mut painted: Vec<(usize, BBoxPx)> = Vec::new();
    for (idx, (region, layout)) in items.iter().enumerate() {
        let Some(area) = footprint(region, layout, style) else {
            continue;
        };
        if let Some((earlier, _)) = painted.iter().find(|(_, prev)| prev.intersects(&area)) {
            bail!(
                "region {} at {:?} overlaps region {} painted earlier",
                idx,
                region,
                earlier
            );
        }
        painted.push((idx, area));
    }
    Ok(())
}

fn rasterize(image: &mut RgbaImage, svg: &str, database: &Arc<fontdb::Database>) -> Result<()> {
    let options = Options {
        fontdb: Arc::clone(database),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;

    let (width, height) = image.dimensions();
    let size = IntSize::from_wh(width, height).ok_or_else(|| anyhow!("empty canvas size"))?;
    let mut pixmap = Pixmap::from_vec(image.as_raw().clone(), size)
        .ok_or_else(|| anyhow!("failed to wrap page buffer for drawing"))?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());
    *image = RgbaImage::from_raw(width, height, pixmap.take())
        .ok_or_else(|| anyhow!("failed to rebuild page buffer after drawing"))?;
    Ok(())
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn compositor(style: RenderStyle) -> Compositor {
        Compositor::new(style, Arc::new(fontdb::Database::new()))
    }

    fn single_line(text: &str, x: i32, y: i32, width: u32, font_size: u32) -> LayoutResult {
        LayoutResult {
            lines: vec![LayoutLine {
                text: text.to_string(),
                x,
                y,
                width,
            }],
            font_size,
            origin: (x, y),
        }
    }

    #[test]
    fn background_patch_covers_line_box() {
        let mut image = RgbaImage::from_pixel(100, 60, Rgba([0, 0, 0, 255]));
        let layout = single_line("hi", 40, 35, 20, 10);
        compositor(RenderStyle::default())
            .paint(&mut image, &BBoxPx::new(0, 0, 100, 60), &layout)
            .expect("paint");

        // Patch spans x 35..65, y 20..40.
        assert_eq!(image.get_pixel(36, 21), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(64, 39), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(30, 30), &Rgba([0, 0, 0, 255]));
        assert_eq!(image.get_pixel(50, 45), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn outline_is_drawn_on_region_edge() {
        let mut image = RgbaImage::from_pixel(80, 60, Rgba([255, 255, 255, 255]));
        let style = RenderStyle {
            draw_background: false,
            draw_outline: true,
            outline_color: "#ff0000".to_string(),
            ..RenderStyle::default()
        };
        let empty = LayoutResult {
            lines: Vec::new(),
            font_size: 12,
            origin: (0, 0),
        };
        compositor(style)
            .paint(&mut image, &BBoxPx::new(10, 10, 50, 30), &empty)
            .expect("paint");

        assert_eq!(image.get_pixel(10, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(30, 25), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn empty_layout_without_outline_is_a_no_op() {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([7, 7, 7, 255]));
        let before = image.clone();
        let empty = LayoutResult {
            lines: Vec::new(),
            font_size: 12,
            origin: (5, 5),
        };
        let painted = compositor(RenderStyle::default())
            .paint_all(&mut image, &[(BBoxPx::new(0, 0, 10, 10), empty)])
            .expect("paint");
        assert_eq!(painted, 0);
        assert_eq!(image, before);
    }

    #[test]
    fn overlapping_regions_fail_when_overlap_is_disallowed() {
        let mut image = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let before = image.clone();
        let items = vec![
            (BBoxPx::new(0, 0, 60, 40), single_line("one", 10, 25, 30, 10)),
            (BBoxPx::new(20, 10, 60, 40), single_line("two", 20, 30, 30, 10)),
        ];
        let strict = compositor(RenderStyle {
            allow_overlap: false,
            ..RenderStyle::default()
        });
        assert!(strict.paint_all(&mut image, &items).is_err());
        assert_eq!(image, before);

        let lenient = compositor(RenderStyle::default());
        assert_eq!(lenient.paint_all(&mut image, &items).expect("paint"), 2);
    }

    #[test]
    fn overlay_orders_patch_outline_text() {
        let style = RenderStyle {
            draw_outline: true,
            font_family: Some("Noto <Sans>".to_string()),
            ..RenderStyle::default()
        };
        let svg = overlay_svg(
            50,
            50,
            &[(BBoxPx::new(0, 0, 50, 50), single_line("a & b", 5, 30, 20, 10))],
            &style,
        );
        let patch = svg.find(r##"fill="#ffffff""##).expect("patch");
        let outline = svg.find(r#"fill="none""#).expect("outline");
        let text = svg.find("<text").expect("text");
        assert!(patch < outline && outline < text);
        assert!(svg.contains("a &amp; b"));
        assert!(svg.contains("Noto &lt;Sans&gt;"));
    }
}
