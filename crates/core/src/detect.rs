use crate::codec::{trim_incomplete_utf8, Codec, DecodeMode, REPLACEMENT};
use chardetng::EncodingDetector;
use serde::{Deserialize, Serialize};

/// Below this share of clean characters a guess is treated as no guess at all.
const MIN_CLEAN_RATIO: f32 = 0.5;
const MAX_CONTROL_RATIO: f32 = 0.3;

/// A detector's verdict on a byte sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub encoding: Option<String>,
    pub confidence: f32,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            encoding: None,
            confidence: 0.0,
        }
    }

    pub fn of(encoding: impl Into<String>, confidence: f32) -> Self {
        Self {
            encoding: Some(encoding.into()),
            confidence,
        }
    }
}

/// Guesses the encoding of a byte sample.
pub trait Detector: Send + Sync {
    fn detect(&self, sample: &[u8]) -> Detection;
}

/// Default detector backed by `chardetng`.
///
/// BOMs and pure ASCII are recognized up front. For everything else the statistical guess is
/// scored by how cleanly the sample decodes under it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChardetDetector;

impl Detector for ChardetDetector {
    fn detect(&self, sample: &[u8]) -> Detection {
        if sample.is_empty() {
            return Detection::none();
        }
        if let Some(label) = bom_label(sample) {
            return Detection::of(label, 1.0);
        }
        if sample.is_ascii() {
            return Detection::of("ascii", 1.0);
        }

        // A sample cut in the middle of a UTF-8 sequence must still count as UTF-8.
        let mut detector = EncodingDetector::new();
        detector.feed(trim_incomplete_utf8(sample), true);
        let codec = Codec::Web(detector.guess(None, true));

        let Ok(text) = codec.decode(sample, DecodeMode::Replace, false) else {
            return Detection::none();
        };
        let total = text.chars().count();
        if total == 0 {
            return Detection::none();
        }

        let replaced = text.chars().filter(|&c| c == REPLACEMENT).count();
        let controls = text.chars().filter(|&c| is_binary_control(c)).count();
        let clean = 1.0 - replaced as f32 / total as f32;

        if clean < MIN_CLEAN_RATIO || controls as f32 / total as f32 > MAX_CONTROL_RATIO {
            return Detection::none();
        }
        Detection::of(codec.name(), clean)
    }
}

fn bom_label(sample: &[u8]) -> Option<&'static str> {
    match sample {
        [0xEF, 0xBB, 0xBF, ..] => Some("utf-8-sig"),
        [0x00, 0x00, 0xFE, 0xFF, ..] | [0xFF, 0xFE, 0x00, 0x00, ..] => Some("utf-32"),
        [0xFE, 0xFF, ..] | [0xFF, 0xFE, ..] => Some("utf-16"),
        _ => None,
    }
}

fn is_binary_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\x0C')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_has_no_guess() {
        assert_eq!(ChardetDetector.detect(b""), Detection::none());
    }

    #[test]
    fn ascii_is_reported_as_ascii() {
        let d = ChardetDetector.detect(b"Chapter 1\nIt was a dark night.");
        assert_eq!(d.encoding.as_deref(), Some("ascii"));
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn boms_are_recognized() {
        assert_eq!(
            ChardetDetector.detect(b"\xEF\xBB\xBFabc").encoding.as_deref(),
            Some("utf-8-sig")
        );
        assert_eq!(
            ChardetDetector.detect(&[0xFF, 0xFE, b'a', 0]).encoding.as_deref(),
            Some("utf-16")
        );
        assert_eq!(
            ChardetDetector.detect(&[0xFF, 0xFE, 0, 0, b'a', 0, 0, 0]).encoding.as_deref(),
            Some("utf-32")
        );
    }

    #[test]
    fn utf8_chinese_is_detected() {
        let text = "第一章 重生\n他回到了都市，一切都重新开始。".repeat(20);
        let d = ChardetDetector.detect(text.as_bytes());
        assert_eq!(d.encoding.as_deref(), Some("utf-8"));
        assert!(d.confidence > 0.9);
    }

    #[test]
    fn gbk_chinese_is_detected_as_legacy_chinese() {
        let text = "第一章 重生\n他回到了都市，一切都重新开始。修炼之路漫长。".repeat(30);
        let bytes = Codec::parse("gbk").unwrap().encode(&text).unwrap();
        let d = ChardetDetector.detect(&bytes);
        let name = d.encoding.unwrap();
        assert!(name == "gbk" || name == "gb18030", "got {name}");
    }

    #[test]
    fn binary_sample_has_no_guess() {
        let bytes: Vec<u8> = (0..2048u32).map(|i| (i % 32) as u8 | 0x80 * ((i % 7 == 0) as u8)).collect();
        assert_eq!(ChardetDetector.detect(&bytes).encoding, None);
    }
}
