/// Collapses whitespace runs into single spaces and drops NUL characters.
pub fn clean_text(text: &str) -> String {
    text.replace('\0', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Loose script check used to drop OCR noise in the wrong script.
/// Unknown language codes keep everything.
pub fn matches_language(text: &str, lang: &str) -> bool {
    match lang.trim().to_ascii_lowercase().as_str() {
        "en" => text.chars().any(|ch| ch.is_ascii()),
        "ar" => text.chars().any(is_arabic),
        _ => true,
    }
}

fn is_arabic(ch: char) -> bool {
    matches!(ch as u32, 0x0600..=0x06FF)
}

pub(crate) fn mean(values: impl IntoIterator<Item = f32>) -> f32 {
    let mut total = 0.0;
    let mut count = 0usize;
    for value in values {
        total += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  hello\n\tworld\0 "), "hello world");
        assert_eq!(clean_text("\0 \n"), "");
    }

    #[test]
    fn language_filter() {
        assert!(matches_language("hello", "en"));
        assert!(!matches_language("مرحبا", "en"));
        assert!(matches_language("مرحبا", "ar"));
        assert!(!matches_language("hello", "ar"));
        assert!(matches_language("こんにちは", "ja"));
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(Vec::<f32>::new()), 0.0);
        assert!((mean([0.5, 1.0]) - 0.75).abs() < 1e-6);
    }
}
