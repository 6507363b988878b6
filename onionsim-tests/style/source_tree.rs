//! Workspace source discovery for the style checks.

use std::fs;
use std::path::{Path, PathBuf};

/// A source file with its contents.
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
}

impl SourceFile {
    /// Path relative to the workspace root, for messages.
    pub fn display(&self) -> String {
        self.path
            .strip_prefix(workspace_root())
            .unwrap_or(&self.path)
            .display()
            .to_string()
    }

    /// File name without directories.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the file only holds tests or fixtures.
    pub fn is_test_code(&self) -> bool {
        let path = self.path.to_string_lossy();
        path.contains("onionsim-tests")
            || path.ends_with("tests.rs")
            || path.ends_with("test_network.rs")
            || path.contains("/benches/")
    }

    /// Lines before the first `#[cfg(test)]`.
    pub fn production_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.content
            .lines()
            .enumerate()
            .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
            .map(|(index, line)| (index + 1, line))
    }
}

/// A rule broken at one line.
#[derive(Debug)]
pub struct Violation {
    pub file: String,
    pub line: usize,
    pub rule: &'static str,
    pub message: String,
}

/// Fails the test with every violation listed.
pub fn assert_clean(violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    let listing: Vec<String> = violations
        .iter()
        .map(|v| format!("{}:{}: [{}] {}", v.file, v.line, v.rule, v.message))
        .collect();
    panic!("{} style violations:\n{}", violations.len(), listing.join("\n"));
}

pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Every `.rs` file of the `onionsim-*` crates.
pub fn workspace_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(&root) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_crate = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("onionsim-"));
        if path.is_dir() && is_crate {
            collect(&path, &mut files);
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn collect(dir: &Path, files: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.') || name == "target");
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs")
            && let Ok(content) = fs::read_to_string(&path)
        {
            files.push(SourceFile { path, content });
        }
    }
}

#[test]
fn test_sources_are_found() {
    let files = workspace_sources();
    assert!(files.iter().any(|file| file.display().ends_with("scheduler.rs")));
    assert!(files.iter().all(|file| !file.display().starts_with("examples")));
}
