use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use novel_shelf_core::{is_txt, unique_path};
use tracing::{debug, warn};

/// All `.txt` files (any case) under `dir`, sorted by path. Hidden files are skipped.
pub fn scan_text_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = match recursive {
        true => WalkDir::new(dir),
        false => WalkDir::new(dir).max_depth(1),
    };

    let mut paths: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && !is_hidden(e.path()) && is_txt(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths
}

/// Text files directly inside the pending directory, with `.TXT`-style extensions renamed to `.txt`.
pub fn scan_pending(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = scan_text_files(dir, false)
        .into_iter()
        .map(|path| normalize_extension(&path))
        .collect::<std::io::Result<_>>()?;
    paths.sort();
    debug!(dir = %dir.display(), count = paths.len(), "pending files");
    Ok(paths)
}

fn normalize_extension(path: &Path) -> std::io::Result<PathBuf> {
    let already_lower = path.extension().and_then(|e| e.to_str()) == Some("txt");
    let (Some(parent), Some(stem)) = (path.parent(), path.file_stem()) else {
        return Ok(path.to_path_buf());
    };
    if already_lower {
        return Ok(path.to_path_buf());
    }

    let target = unique_path(parent, &format!("{}.txt", stem.to_string_lossy()));
    std::fs::rename(path, &target).inspect_err(|e| {
        warn!(file = %path.display(), error = %e, "failed to normalize extension");
    })?;
    Ok(target)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[(u64, &str)] = &[
        (1024 * 1024 * 1024, "GB"),
        (1024 * 1024, "MB"),
        (1024, "KB"),
    ];

    UNITS
        .iter()
        .find(|(threshold, _)| bytes >= *threshold)
        .map(|(threshold, unit)| format!("{:.2} {}", bytes as f64 / *threshold as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_finds_txt_recursively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("sub/a.TXT"), "a").unwrap();
        fs::write(dir.path().join("cover.jpg"), "x").unwrap();

        let files = scan_text_files(dir.path(), true);
        assert_eq!(files, [dir.path().join("b.txt"), dir.path().join("sub/a.TXT")]);

        let flat = scan_text_files(dir.path(), false);
        assert_eq!(flat, [dir.path().join("b.txt")]);
    }

    #[test]
    fn scan_excludes_hidden() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("book.txt"), "x").unwrap();
        fs::write(dir.path().join(".hidden.txt"), "x").unwrap();

        assert_eq!(scan_text_files(dir.path(), true).len(), 1);
    }

    #[test]
    fn empty_or_missing_dir_scans_to_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(scan_text_files(dir.path(), true).is_empty());
        assert!(scan_pending(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn pending_extensions_are_normalized() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.TXT"), "upper").unwrap();
        fs::write(dir.path().join("b.Txt"), "mixed").unwrap();
        fs::write(dir.path().join("b.txt"), "lower").unwrap();

        let files = scan_pending(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["a.txt", "b.txt", "b_1.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("b_1.txt")).unwrap(), "mixed");
    }

    #[test]
    fn format_size_display() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }
}
