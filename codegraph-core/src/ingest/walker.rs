//! Directory walking for the dev agent's index flow (spec §4.5): default
//! exclusions, user glob patterns, and extension filtering.

use ignore::WalkBuilder;

const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    ".git",
    ".cache",
    "coverage",
    "__pycache__",
    ".venv",
];

const DEFAULT_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "py", "java", "cpp", "cc", "c", "h", "hpp", "go", "rs",
];

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub exclude_patterns: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Walks `root`, skipping symlinks, hidden directories, and
/// [`DEFAULT_EXCLUDED_DIRS`], plus any directory matching one of
/// `options.exclude_patterns` (supporting `*`/`**` globs). Returns file paths
/// whose extension is in `options.extensions`.
pub fn walk(root: &str, options: &WalkOptions) -> Vec<String> {
    let globs: Vec<glob::Pattern> = options
        .exclude_patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .follow_links(false)
        .git_ignore(true)
        .build();

    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let path_str = path.to_string_lossy().to_string();

        if path
            .components()
            .any(|c| DEFAULT_EXCLUDED_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            continue;
        }

        if globs.iter().any(|g| g.matches(&path_str)) {
            continue;
        }

        let matches_extension = path
            .extension()
            .map(|ext| options.extensions.iter().any(|e| e == ext.to_string_lossy().as_ref()))
            .unwrap_or(false);
        if !matches_extension {
            continue;
        }

        files.push(path_str);
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_exclusions_skip_node_modules_and_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/x.js"), "x").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let files = walk(dir.path().to_str().unwrap(), &WalkOptions::default());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.rs"));
    }

    #[test]
    fn user_glob_pattern_excludes_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.test.ts"), "x").unwrap();
        fs::write(dir.path().join("b.ts"), "x").unwrap();

        let mut options = WalkOptions::default();
        options.exclude_patterns.push("**/*.test.ts".into());
        let files = walk(dir.path().to_str().unwrap(), &options);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("b.ts"));
    }

    #[test]
    fn extension_filter_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rb"), "x").unwrap();
        fs::write(dir.path().join("b.rs"), "x").unwrap();

        let files = walk(dir.path().to_str().unwrap(), &WalkOptions::default());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("b.rs"));
    }
}
