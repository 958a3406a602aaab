//! Encoding repair: decode with a fixed chain of fallbacks, clean, and atomically rewrite.

use crate::codec::{Codec, CodecError, DecodeMode, REPLACEMENT};
use crate::paths::unique_path;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("file not found: {0}")]
    Missing(PathBuf),
    #[error("file is empty: {0}")]
    Empty(PathBuf),
    #[error("no decoding strategy produced content")]
    Exhausted,
    #[error("write verification failed: expected {expected} chars, read back {actual}")]
    VerificationMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One step of the decode chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Declared(Codec, DecodeMode),
    Fallback(&'static str),
    RawLossy,
}

impl Strategy {
    pub fn describe(&self) -> String {
        match self {
            Self::Declared(codec, DecodeMode::Strict) => format!("{codec} (strict)"),
            Self::Declared(codec, DecodeMode::Replace) => format!("{codec} (replace)"),
            Self::Fallback(label) => format!("{label} (replace)"),
            Self::RawLossy => "raw bytes as utf-8 (lossy)".to_string(),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Declared(codec, mode) => codec.decode(bytes, *mode, true).ok(),
            Self::Fallback(label) => Codec::from_label(label)?.decode(bytes, DecodeMode::Replace, true).ok(),
            Self::RawLossy => Some(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

const FALLBACKS: &[&str] = &[
    "utf-8-sig", "gbk", "gb18030", "big5", "big5-hkscs", "utf-16", "utf-32", "cp1252", "latin1",
];

/// The ordered chain for a file declared as `declared`. Unknown labels skip the declared steps.
pub fn strategy_chain(declared: Option<&str>) -> Vec<Strategy> {
    let declared = declared.and_then(Codec::from_label);

    declared
        .into_iter()
        .flat_map(|codec| {
            [
                Strategy::Declared(codec, DecodeMode::Strict),
                Strategy::Declared(codec, DecodeMode::Replace),
            ]
        })
        .chain(FALLBACKS.iter().map(|&label| Strategy::Fallback(label)))
        .chain(std::iter::once(Strategy::RawLossy))
        .collect()
}

/// Text decoded by the first strategy that yielded content.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub strategy: String,
    pub replaced_chars: usize,
}

/// Run the chain over `bytes` and replace every U+FFFD with a space.
pub fn decode_with_fallbacks(bytes: &[u8], declared: Option<&str>) -> Result<Decoded, RepairError> {
    strategy_chain(declared)
        .iter()
        .find_map(|strategy| {
            strategy
                .decode(bytes)
                .filter(|text| !text.is_empty())
                .map(|text| (strategy.describe(), text))
        })
        .map(|(strategy, text)| {
            let replaced_chars = text.chars().filter(|&c| c == REPLACEMENT).count();
            Decoded {
                text: text.replace(REPLACEMENT, " "),
                strategy,
                replaced_chars,
            }
        })
        .ok_or(RepairError::Exhausted)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub strategy: String,
    pub chars: usize,
    pub replaced_chars: usize,
}

/// Rewrite `path` at `target`, decoding it as `declared` with fallbacks.
pub fn repair_file(path: &Path, declared: Option<&str>, target: Codec) -> Result<RepairOutcome, RepairError> {
    if !path.exists() {
        return Err(RepairError::Missing(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(RepairError::Empty(path.to_path_buf()));
    }

    let decoded = decode_with_fallbacks(&bytes, declared)?;
    debug!(file = %path.display(), strategy = %decoded.strategy, "decoded");

    let chars = decoded.text.chars().count();
    write_verified(path, &decoded.text, target)?;

    info!(file = %path.display(), strategy = %decoded.strategy, replaced = decoded.replaced_chars, "repaired");
    Ok(RepairOutcome {
        strategy: decoded.strategy,
        chars,
        replaced_chars: decoded.replaced_chars,
    })
}

/// Write `text` to a sibling temp file, read it back, and replace `path` only if it matches.
pub fn write_verified(path: &Path, text: &str, target: Codec) -> Result<(), RepairError> {
    let encoded = target.encode(text)?;
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;

    let written = fs::read(tmp.path())?;
    let expected = text.chars().count();
    let actual = target
        .decode(&written, DecodeMode::Replace, true)
        .map(|t| t.chars().count())
        .unwrap_or(0);
    if actual != expected {
        return Err(RepairError::VerificationMismatch { expected, actual });
    }

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| RepairError::Io(e.error))?;
    Ok(())
}

/// Copy `path` verbatim into `backup_dir`, never overwriting an earlier backup.
pub fn create_backup(path: &Path, backup_dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let dest = unique_path(backup_dir, &name);
    fs::copy(path, &dest)?;
    Ok(dest)
}
