use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use novel_shelf_core::{sanitize_component, unique_path};
use tracing::debug;

use crate::classifier::Decision;
use crate::config::Config;

/// Where a file should go for a decision, before collision handling.
///
/// Classified files keep their name in the category directory. Files needing review go to the
/// review directory with the reason appended as `name【reason】.ext`.
pub fn plan_target(source: &Path, decision: &Decision, config: &Config) -> (PathBuf, String) {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match decision {
        Decision::Classified { category, .. } => (config.category_dir(category), file_name),
        Decision::NeedsReview(reason) => {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let suffix = sanitize_component(&reason.to_string());
            let name = match source.extension() {
                Some(ext) => format!("{stem}【{suffix}】.{}", ext.to_string_lossy()),
                None => format!("{stem}【{suffix}】"),
            };
            (config.review_dir(), name)
        }
    }
}

/// Move `source` to the directory its decision names, never overwriting an existing file.
pub fn relocate(source: &Path, decision: &Decision, config: &Config) -> io::Result<PathBuf> {
    let (dir, name) = plan_target(source, decision, config);
    fs::create_dir_all(&dir)?;

    let target = unique_path(&dir, &name);
    move_file(source, &target)?;

    debug!(from = %source.display(), to = %target.display(), "relocated");
    Ok(target)
}

/// Rename, falling back to copy and remove across filesystems.
pub fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(_) if source.is_file() => {
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}
