//! File discovery: git-aware enumeration with a pruned filesystem fallback.
//!
//! Each root is enumerated through the nearest git repository when one
//! exists (tracked files plus non-ignored untracked files); otherwise a
//! filesystem walk prunes well-known generated/vendored directories before
//! descending. Results preserve first-seen order across roots and are
//! deduplicated by absolute path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use git2::Repository;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::config::{RootConfig, ValknutConfig};
use crate::core::errors::{Result, ValknutError};
use crate::lang::registry::supported_extensions;

/// Directory names never descended into during the filesystem fallback.
const PRUNED_DIRECTORIES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "third_party",
    ".tox",
    ".mypy_cache",
    "coverage",
];

/// Outcome of discovery: ordered unique files plus per-root warnings.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Ordered, deduplicated file paths
    pub files: Vec<PathBuf>,
    /// Non-fatal problems encountered (unreadable roots, walk errors)
    pub warnings: Vec<String>,
}

/// Discover candidate source files for the configured roots.
pub fn discover_files(config: &ValknutConfig) -> Result<DiscoveryResult> {
    let extensions: HashSet<String> = supported_extensions(&config.languages)
        .into_iter()
        .collect();

    let mut result = DiscoveryResult::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for root in &config.roots {
        if let Err(err) = discover_root(root, &extensions, &mut result, &mut seen) {
            let warning = format!("skipping root '{}': {err}", root.path.display());
            warn!("{warning}");
            result.warnings.push(warning);
        }
    }

    info!(files = result.files.len(), "file discovery completed");
    Ok(result)
}

fn discover_root(
    root: &RootConfig,
    extensions: &HashSet<String>,
    result: &mut DiscoveryResult,
    seen: &mut HashSet<PathBuf>,
) -> Result<()> {
    let root_path = std::fs::canonicalize(&root.path)
        .map_err(|e| ValknutError::io(format!("unreadable root '{}'", root.path.display()), e))?;

    let include_glob = compile_globset(&root.include)?;
    let exclude_glob = compile_globset(&root.exclude)?;

    if root_path.is_file() {
        if keep_file(&root_path, &root_path, include_glob.as_ref(), exclude_glob.as_ref(), extensions)
            && seen.insert(root_path.clone())
        {
            result.files.push(root_path);
        }
        return Ok(());
    }

    let candidates = match git_enumerate(&root_path) {
        Some(files) => {
            info!(root = %root_path.display(), "using git enumeration");
            files
        }
        None => {
            debug!(root = %root_path.display(), "no repository found; walking the filesystem");
            walk_enumerate(&root_path, exclude_glob.as_ref(), result)
        }
    };

    for file in candidates {
        if keep_file(&file, &root_path, include_glob.as_ref(), exclude_glob.as_ref(), extensions)
            && seen.insert(file.clone())
        {
            result.files.push(file);
        }
    }
    Ok(())
}

/// Union of tracked files and non-ignored untracked files, or `None` when no
/// repository marker is found above the root.
fn git_enumerate(root: &Path) -> Option<Vec<PathBuf>> {
    let repo = Repository::discover(root).ok()?;
    let workdir = repo.workdir()?.to_path_buf();

    let mut files = Vec::new();
    let mut seen = HashSet::new();

    if let Ok(index) = repo.index() {
        for entry in index.iter() {
            let rel = String::from_utf8_lossy(&entry.path).into_owned();
            let absolute = workdir.join(rel);
            if absolute.is_file() && absolute.starts_with(root) && seen.insert(absolute.clone()) {
                files.push(absolute);
            }
        }
    }

    // Untracked-but-not-ignored files come from a gitignore-aware walk.
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .hidden(false)
        .build();
    for entry in walker.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            let path = entry.path().to_path_buf();
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    files.sort();
    Some(files)
}

/// Filesystem walk with early directory pruning: excluded directories are
/// never descended.
fn walk_enumerate(
    root: &Path,
    exclude_glob: Option<&GlobSet>,
    result: &mut DiscoveryResult,
) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if PRUNED_DIRECTORIES.contains(&name.as_ref()) {
            return false;
        }
        if let Some(exclude) = exclude_glob {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            // Match the directory both bare and as a prefix pattern.
            if exclude.is_match(relative) {
                return false;
            }
        }
        true
    });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                // Individual stat failures skip the file.
                result.warnings.push(format!("walk error under '{}': {err}", root.display()));
            }
        }
    }

    files.sort();
    files
}

fn keep_file(
    path: &Path,
    base: &Path,
    include_glob: Option<&GlobSet>,
    exclude_glob: Option<&GlobSet>,
    extensions: &HashSet<String>,
) -> bool {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !extensions.contains(&extension.to_ascii_lowercase()) {
        return false;
    }

    let relative = path.strip_prefix(base).unwrap_or(path);
    if let Some(exclude) = exclude_glob {
        if exclude.is_match(relative) {
            return false;
        }
    }
    match include_glob {
        Some(include) => include.is_match(relative),
        None => true,
    }
}

fn compile_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    let mut builder = GlobSetBuilder::new();
    let mut added = false;
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|err| {
                ValknutError::config(format!("invalid glob pattern '{pattern}': {err}"))
            })?;
        builder.add(glob);
        added = true;
    }
    if !added {
        return Ok(None);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| ValknutError::config(format!("failed to build glob set: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RootConfig;

    fn config_for(dir: &Path) -> ValknutConfig {
        let mut config = ValknutConfig::default();
        config.roots = vec![RootConfig::new(dir)];
        config
    }

    #[test]
    fn discovers_files_matching_enabled_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello\n").unwrap();

        let result = discover_files(&config_for(dir.path())).unwrap();
        let names: Vec<String> = result
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"a.py".to_string()));
        assert!(names.contains(&"b.rs".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
    }

    #[test]
    fn vendored_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let vendored = dir.path().join("node_modules").join("lib");
        std::fs::create_dir_all(&vendored).unwrap();
        std::fs::write(vendored.join("x.js"), "module.exports = 1\n").unwrap();
        std::fs::write(dir.path().join("app.js"), "let a = 1\n").unwrap();

        let result = discover_files(&config_for(dir.path())).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].ends_with("app.js"));
    }

    #[test]
    fn exclude_globs_filter_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("skip")).unwrap();
        std::fs::write(dir.path().join("skip").join("x.py"), "a = 1\n").unwrap();
        std::fs::write(dir.path().join("keep.py"), "b = 2\n").unwrap();

        let mut config = config_for(dir.path());
        config.roots[0].exclude.push("skip/**".to_string());

        let result = discover_files(&config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].ends_with("keep.py"));
    }

    #[test]
    fn missing_roots_warn_and_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.py"), "a = 1\n").unwrap();

        let mut config = config_for(dir.path());
        config
            .roots
            .push(RootConfig::new(dir.path().join("does-not-exist")));

        let result = discover_files(&config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn duplicate_roots_deduplicate_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let mut config = config_for(dir.path());
        config.roots.push(RootConfig::new(dir.path()));

        let result = discover_files(&config).unwrap();
        assert_eq!(result.files.len(), 1);
    }
}
