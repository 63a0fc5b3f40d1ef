use crate::bubble::{BBoxPx, TextFragment};

const WORD_LEVEL: u32 = 5;
const TSV_COLUMNS: usize = 12;

/// Turns tesseract TSV output into word fragments. Confidence is rescaled
/// from 0..100 to 0..1; rows without text or with a negative confidence
/// (layout rows) are skipped.
pub fn parse_tsv_fragments(tsv: &str) -> Vec<TextFragment> {
    let mut fragments = Vec::new();
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < TSV_COLUMNS {
            continue;
        }
        if cols[0].parse::<u32>().ok() != Some(WORD_LEVEL) {
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let field = |idx: usize| cols[idx].trim().parse::<u32>().unwrap_or(0);
        let (left, top, width, height) = (field(6), field(7), field(8), field(9));
        if width == 0 || height == 0 {
            continue;
        }
        fragments.push(TextFragment::from_bbox(
            text,
            (conf / 100.0).clamp(0.0, 1.0),
            BBoxPx::new(left, top, width, height),
        ));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bubble::Point;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn word_rows_become_fragments() {
        let tsv = format!(
            "{}\n{}\n{}\n{}\n",
            HEADER,
            "4\t1\t1\t1\t1\t0\t10\t20\t80\t12\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t30\t12\t96.5\tHello",
            "5\t1\t1\t1\t1\t2\t45\t20\t45\t12\t88\tworld!",
        );
        let fragments = parse_tsv_fragments(&tsv);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text, "Hello");
        assert!((fragments[0].confidence - 0.965).abs() < 1e-6);
        assert_eq!(fragments[0].polygon[0], Point::new(10.0, 20.0));
        assert_eq!(fragments[0].polygon[2], Point::new(40.0, 32.0));
        assert_eq!(fragments[1].text, "world!");
    }

    #[test]
    fn malformed_and_empty_rows_are_skipped() {
        let tsv = format!(
            "{}\n{}\n{}\n{}\n",
            HEADER,
            "5\t1\t1\t1\t1\t1\t10\t20\t30\t12\t90\t   ",
            "5\t1\t1\t1\t1\t1\t10\t20",
            "5\t1\t1\t1\t1\t1\t10\t20\t0\t12\t90\tzero",
        );
        assert!(parse_tsv_fragments(&tsv).is_empty());
        assert!(parse_tsv_fragments("").is_empty());
    }
}
