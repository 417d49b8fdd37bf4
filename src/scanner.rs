use anyhow::Context;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

use crate::chunker;
use crate::config::Config;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// FileEnumerator — walk a root, admit indexable files, deterministically.
//
// `.gitignore` and hidden entries are always respected (ignore crate
// standard filters). On top of that: a fixed junk-override list for
// universally noisy artifacts, the configured exclude substrings, the
// extension include set (falling back to whatever the chunker supports),
// and the size ceiling. Output is sorted by relative path so two scans of
// the same tree agree byte for byte.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub repo_root: PathBuf,
    /// Lowercase extensions (no dot); empty = chunker-supported set.
    pub include_extensions: Vec<String>,
    /// Path substrings excluded anywhere in the relative path.
    pub exclude_patterns: Vec<String>,
    pub max_file_bytes: u64,
}

impl ScanOptions {
    pub fn from_config(repo_root: &Path, cfg: &Config) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            include_extensions: cfg
                .scan
                .include_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: cfg.scan.exclude_patterns.clone(),
            max_file_bytes: cfg.effective_max_file_size(),
        }
    }

    /// Single-path admission, shared verbatim with the watcher so both
    /// sides of the engine agree on what counts as a source file.
    pub fn admits(&self, rel_path: &Path) -> bool {
        let rel = rel_path.to_string_lossy().replace('\\', "/");

        if rel
            .split('/')
            .any(|comp| comp.starts_with('.') && !comp.is_empty())
        {
            return false;
        }
        if self
            .exclude_patterns
            .iter()
            .any(|p| !p.is_empty() && rel.contains(p.as_str()))
        {
            return false;
        }
        if JUNK_DIRS
            .iter()
            .any(|d| rel.split('/').any(|comp| comp == *d))
        {
            return false;
        }

        let ext = rel_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if self.include_extensions.is_empty() {
            chunker::is_supported(rel_path)
        } else {
            self.include_extensions.iter().any(|e| e == &ext)
        }
    }
}

/// Build outputs / heavy directories that never hold indexable source.
const JUNK_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    ".next",
    ".nuxt",
    "out",
    "vendor",
    "DerivedData",
    "Pods",
];

fn junk_overrides(repo_root: &Path, exclude_patterns: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);

    let build = |ob: &mut OverrideBuilder| -> anyhow::Result<Override> {
        // Lockfiles and minified bundles match by name anywhere.
        for f in ["**/*.lock", "**/package-lock.json", "**/*.min.js", "**/*.map"] {
            ob.add(&format!("!{f}"))?;
        }

        // Note: for directories, include patterns for both the directory entry
        // and its descendants, otherwise walkers may still descend into it.
        for d in JUNK_DIRS {
            ob.add(&format!("!**/{d}"))?;
            ob.add(&format!("!**/{d}/**"))?;
        }

        for p in exclude_patterns {
            let p = p.trim().trim_matches('/');
            if p.is_empty() {
                continue;
            }
            ob.add(&format!("!**/*{p}*"))?;
            ob.add(&format!("!**/*{p}*/**"))?;
        }

        Ok(ob.build()?)
    };

    build(&mut ob)
        .context("building scan overrides")
        .map_err(|e| EngineError::InvalidArgument(e.to_string()))
}

/// Enumerate candidate files under `opts.repo_root`, sorted by relative path.
pub fn enumerate_files(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    std::fs::metadata(&opts.repo_root).map_err(|e| {
        EngineError::NotInitialized(format!(
            "scan root does not exist: {} ({e})",
            opts.repo_root.display()
        ))
    })?;

    let overrides = junk_overrides(&opts.repo_root, &opts.exclude_patterns)?;
    let walker = WalkBuilder::new(&opts.repo_root)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .overrides(overrides)
        .build();

    let mut entries = Vec::new();
    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        let rel_path = match abs_path.strip_prefix(&opts.repo_root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };

        if !opts.admits(&rel_path) {
            continue;
        }

        let bytes = match std::fs::metadata(&abs_path).map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };
        // At the limit is in; one byte over is out.
        if bytes == 0 || bytes > opts.max_file_bytes {
            continue;
        }

        entries.push(FileEntry {
            abs_path,
            rel_path,
            bytes,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}
