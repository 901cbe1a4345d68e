use std::io::{BufRead, BufReader};
use std::path::Path;

use walkdir::{DirEntry, WalkDir};

/// Start-of-conflict marker, including the trailing space git writes.
pub const CONFLICT_MARKER: &str = "<<<<<<< ";

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".next", "vendor"];

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn has_marker(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    BufReader::new(file)
        .split(b'\n')
        .map_while(Result::ok)
        .any(|line| line.starts_with(CONFLICT_MARKER.as_bytes()))
}

/// Walk `root` for source files (by extension) that contain a conflict
/// marker at the start of a line. Returns sorted paths relative to `root`.
pub fn find_conflict_markers(root: &Path, extensions: &[String]) -> Vec<String> {
    let mut found: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
        })
        .filter(|e| has_marker(e.path()))
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    found.sort();
    found
}

/// The subset of `files` (relative to `root`) that still contain a marker.
/// Missing files count as resolved.
pub fn files_with_markers(root: &Path, files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| has_marker(&root.join(f)))
        .cloned()
        .collect()
}
