//! Content sampling: the head of a file plus a few random fragments from beyond it.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::LazyLock;

/// Upper bound on UTF-8 bytes per character, used to size reads.
const MAX_CHAR_BYTES: usize = 4;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[head\]|\[fragment \d+ @ \d+\]").expect("valid marker regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub head_chars: usize,
    pub fragment_count: usize,
    pub fragment_size: usize,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            head_chars: 3000,
            fragment_count: 3,
            fragment_size: 500,
        }
    }
}

/// Read the first `head_chars` characters and `fragment_count` random fragments of `path`.
///
/// Only the needed byte ranges are read. Fragments are drawn from the bytes after the head and
/// only when the file is long enough to hold one. A fragment that would run past the end of the
/// file is replaced by the last `fragment_size` characters. Offsets in the markers are byte
/// offsets of the first character kept.
pub fn sample_file<R: Rng + ?Sized>(path: &Path, spec: &SampleSpec, rng: &mut R) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len() as usize;

    let mut buf = Vec::new();
    (&mut file)
        .take((spec.head_chars * MAX_CHAR_BYTES) as u64)
        .read_to_end(&mut buf)?;
    let (head, head_end) = take_chars(&buf, spec.head_chars);

    let mut out = format!("[head]\n{}\n", head.trim());

    if spec.fragment_count > 0 && spec.fragment_size > 0 && len > head_end + spec.fragment_size {
        let needed = spec.fragment_size * MAX_CHAR_BYTES;
        for n in 1..=spec.fragment_count {
            let picked = rng.random_range(head_end..=len - spec.fragment_size);
            let start = read_at(&mut file, picked, needed, &mut buf)?;
            let (mut fragment, _) = take_chars(&buf[start..], spec.fragment_size);
            let mut offset = picked + start;

            if fragment.chars().count() < spec.fragment_size {
                let tail = len.saturating_sub(needed);
                let start = read_at(&mut file, tail, needed, &mut buf)?;
                let (text, skipped) = last_chars(&buf[start..], spec.fragment_size);
                fragment = text;
                offset = tail + start + skipped;
            }

            out.push_str(&format!("[fragment {n} @ {offset}]\n{}\n", fragment.trim()));
        }
    }

    Ok(out)
}

/// Remove the markers inserted by [`sample_file`].
pub fn strip_markers(text: &str) -> String {
    MARKER.replace_all(text, " ").into_owned()
}

fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Read up to `limit` bytes at `offset` into `buf`; returns the length of a leading partial
/// character to skip.
fn read_at(file: &mut File, offset: usize, limit: usize, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset as u64))?;
    buf.clear();
    (&mut *file).take(limit as u64).read_to_end(buf)?;
    Ok(buf.iter().take_while(|&&b| is_continuation(b)).count())
}

/// Lossily decode `bytes` and keep the last `max` characters, returning the bytes skipped.
fn last_chars(bytes: &[u8], max: usize) -> (String, usize) {
    let text = String::from_utf8_lossy(crate::codec::trim_incomplete_utf8(bytes));
    let drop = text.chars().count().saturating_sub(max);
    let (_, skipped) = take_chars(bytes, drop);
    (text.chars().skip(drop).collect(), skipped)
}

/// Lossily decode `bytes` and keep at most `max` characters, returning the bytes consumed.
fn take_chars(bytes: &[u8], max: usize) -> (String, usize) {
    let text = String::from_utf8_lossy(crate::codec::trim_incomplete_utf8(bytes));
    let mut consumed = 0;
    let kept: String = text
        .chars()
        .take(max)
        .inspect(|c| consumed += if *c == crate::codec::REPLACEMENT { 1 } else { c.len_utf8() })
        .collect();
    (kept, consumed.min(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::TempDir;

    fn spec(head: usize, count: usize, size: usize) -> SampleSpec {
        SampleSpec {
            head_chars: head,
            fragment_count: count,
            fragment_size: size,
        }
    }

    #[test]
    fn short_file_has_only_head() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.txt");
        fs::write(&path, "都市重生").unwrap();

        let out = sample_file(&path, &SampleSpec::default(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(out, "[head]\n都市重生\n");
    }

    #[test]
    fn head_is_truncated_to_chars() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        fs::write(&path, "都市重生修炼").unwrap();

        let out = sample_file(&path, &spec(2, 0, 10), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(out, "[head]\n都市\n");
    }

    #[test]
    fn fragments_come_from_after_head() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        let body = format!("{}{}", "a".repeat(100), "都".repeat(2000));
        fs::write(&path, &body).unwrap();

        let out = sample_file(&path, &spec(100, 3, 50), &mut StdRng::seed_from_u64(7)).unwrap();

        assert!(out.starts_with(&format!("[head]\n{}\n", "a".repeat(100))));
        assert_eq!(out.matches("[fragment ").count(), 3);
        for line in out.lines().filter(|l| !l.starts_with('[')).skip(1) {
            assert!(line.chars().all(|c| c == '都'), "{line}");
            assert!(line.chars().count() <= 50);
        }
    }

    #[test]
    fn cjk_fragments_have_full_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        fs::write(&path, "都".repeat(3000)).unwrap();

        let out = sample_file(&path, &spec(100, 20, 500), &mut StdRng::seed_from_u64(3)).unwrap();

        let fragments: Vec<_> = out.lines().filter(|l| !l.starts_with('[')).skip(1).collect();
        assert_eq!(fragments.len(), 20);
        for fragment in fragments {
            assert_eq!(fragment.chars().count(), 500);
        }
        for offset in out.lines().filter_map(|l| l.strip_prefix("[fragment ")) {
            let offset: usize = offset.split(" @ ").nth(1).unwrap().trim_end_matches(']').parse().unwrap();
            assert!(offset >= 300 && offset % 3 == 0 && offset + 1500 <= 9000, "{offset}");
        }
    }

    #[test]
    fn same_seed_same_sample() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        fs::write(&path, "第一章 重生\n".repeat(2000)).unwrap();

        let a = sample_file(&path, &spec(100, 3, 30), &mut StdRng::seed_from_u64(42)).unwrap();
        let b = sample_file(&path, &spec(100, 3, 30), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn markers_are_stripped() {
        let text = "[head]\nabc\n[fragment 2 @ 3081]\ndef\n";
        let stripped = strip_markers(text);
        assert!(!stripped.contains("[head]"));
        assert!(!stripped.contains("fragment"));
        assert!(stripped.contains("abc") && stripped.contains("def"));
    }
}
