//! Glob expansion with the repository's fixed walking contract.
//!
//! All walks share the same semantics: patterns are matched against
//! workspace-relative paths with forward slashes, dotfiles are included, and
//! directories named in the exclusion list are pruned without descending.
//! Only files are yielded.

use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use path_slash::PathExt;
use wax::{Glob, Pattern};

/// Directories never yielded by any walk.
pub const BASE_EXCLUSIONS: &[&str] = &["node_modules", ".git"];

/// Additional directories excluded when expanding task inputs for hashing.
/// `dist` and `.cache` stay out of input sets even when a user's glob would
/// reach them, otherwise a task's own outputs would invalidate it on every
/// run.
pub const INPUT_EXCLUSIONS: &[&str] = &["node_modules", ".git", "dist", ".cache"];

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("bad glob pattern {pattern}: {message}")]
    BadPattern { pattern: String, message: String },
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("non-utf8 path encountered under {0}")]
    NonUtf8Path(Utf8PathBuf),
}

fn build_matchers(patterns: &[String]) -> Result<Vec<Glob<'static>>, WalkError> {
    patterns
        .iter()
        .map(|pattern| {
            Glob::new(pattern)
                .map(Glob::into_owned)
                .map_err(|err| WalkError::BadPattern {
                    pattern: pattern.clone(),
                    message: err.to_string(),
                })
        })
        .collect()
}

fn is_excluded(entry: &walkdir::DirEntry, exclusions: &[&str]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| exclusions.contains(&name))
            .unwrap_or(false)
}

/// Expand `patterns` under `base`, returning the base-relative paths of every
/// matching file in sorted order. `exclusions` names directories to prune.
pub fn globwalk(
    base: &Utf8Path,
    patterns: &[String],
    exclusions: &[&str],
) -> Result<Vec<Utf8PathBuf>, WalkError> {
    let matchers = build_matchers(patterns)?;
    if matchers.is_empty() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    let walker = walkdir::WalkDir::new(base.as_std_path())
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, exclusions));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // Unreadable subtrees are skipped rather than failing the walk
            Err(err) if err.io_error().is_some() => {
                tracing::debug!("skipping unreadable entry: {err}");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(base.as_std_path())
            .expect("walked path is under the base");
        let slash_path = relative.to_slash_lossy();
        if matchers.iter().any(|glob| glob.is_match(&*slash_path)) {
            let utf8 = to_utf8(base, relative)?;
            matches.push(utf8);
        }
    }

    matches.sort();
    Ok(matches)
}

/// Like [`globwalk`] but also resolves patterns that name an existing path
/// directly without glob syntax matching anything. Used by cleanup, where a
/// pattern may be a literal directory name such as `dist`.
pub fn globwalk_with_direct_paths(
    base: &Utf8Path,
    patterns: &[String],
    exclusions: &[&str],
) -> Result<Vec<Utf8PathBuf>, WalkError> {
    let mut matches = globwalk(base, patterns, exclusions)?;

    for pattern in patterns {
        let candidate = base.join(pattern);
        if candidate.as_std_path().exists() {
            let relative = Utf8PathBuf::from(pattern);
            if !matches.contains(&relative) {
                matches.push(relative);
            }
        }
    }

    matches.sort();
    matches.dedup();
    Ok(matches)
}

fn to_utf8(base: &Utf8Path, relative: &Path) -> Result<Utf8PathBuf, WalkError> {
    Utf8PathBuf::from_path_buf(relative.to_path_buf())
        .map_err(|_| WalkError::NonUtf8Path(base.to_owned()))
}
