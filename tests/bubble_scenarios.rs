use std::sync::Arc;

use bubble_translator::bubble::engine::merge::merge;
use bubble_translator::bubble::{
    BBoxPx, DetectorConfig, LayoutConfig, RegionDetector, TextLayoutEngine, TextMeasure,
};
use bubble_translator::TextFragment;
use image::{Rgba, RgbaImage};

/// Every character is `ratio * font_size` pixels wide.
struct Monospace(f32);

impl TextMeasure for Monospace {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * self.0 * font_size
    }
}

#[test]
fn dark_rectangle_on_white_page_is_one_region() {
    let mut page = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
    for y in 10..40 {
        for x in 10..60 {
            page.put_pixel(x, y, Rgba([0, 0, 0, 255]));
        }
    }
    let regions = RegionDetector::new(DetectorConfig::default())
        .detect(&page)
        .expect("detect");
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].bbox, BBoxPx::new(10, 10, 50, 30));
}

#[test]
fn neighbouring_ocr_fragments_merge_into_one_block() {
    let fragments: Vec<TextFragment> = serde_json::from_str(
        r#"[
            {"text": "cat", "confidence": 0.9, "bbox": [[0,0],[20,0],[20,10],[0,10]]},
            {"text": "sat", "confidence": 0.9, "bbox": [[25,0],[45,0],[45,10],[25,10]]}
        ]"#,
    )
    .expect("fragments");
    let blocks = merge(&fragments, 10);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].text, "cat sat");
}

#[test]
fn layout_of_two_words_in_small_bubble() {
    // Each word alone overflows the 40px bubble and still gets its own line.
    let measure = Monospace(1.25);
    assert!(measure.text_width("hello", 8.0) > 40.0);
    let engine = TextLayoutEngine::new(LayoutConfig::default(), Arc::new(measure));
    let result = engine
        .layout("hello world", &BBoxPx::new(0, 0, 40, 40))
        .expect("layout");
    insta::assert_json_snapshot!(result, @r###"
    {
      "lines": [
        {
          "text": "hello",
          "x": -5,
          "y": 0,
          "width": 50
        },
        {
          "text": "world",
          "x": -5,
          "y": 20,
          "width": 50
        }
      ],
      "font_size": 8,
      "origin": [
        -5,
        0
      ]
    }
    "###);
}

#[test]
fn font_size_is_bounded_for_any_region() {
    let engine = TextLayoutEngine::new(LayoutConfig::default(), Arc::new(Monospace(0.6)));
    for (w, h) in [(1, 1), (3, 500), (40, 40), (640, 480), (4000, 4000)] {
        for text in ["", "a", "a much longer sentence that needs wrapping"] {
            let result = engine
                .layout(text, &BBoxPx::new(5, 5, w, h))
                .expect("layout");
            assert!(
                (8..=20).contains(&result.font_size),
                "{}x{} {:?} -> {}",
                w,
                h,
                text,
                result.font_size
            );
        }
    }
}
