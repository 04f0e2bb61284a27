//! Best-effort batch file reading
//!
//! Serves `POST /files/content`. Every requested path is attempted
//! independently: missing files, directories, permission failures, invalid
//! UTF-8 and path escapes are all simply omitted from the result. Callers
//! must treat a shorter result than the request as normal. The caller
//! pre-checks that `base` itself exists.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::agent::protocol::FileContent;

/// Read every requested file under `base`, preserving request order for
/// the entries that succeed.
pub fn read_many(base: &Path, relative_paths: &[String]) -> Vec<FileContent> {
    let mut contents = Vec::new();

    for rel in relative_paths {
        match read_one(base, rel) {
            Ok(content) => contents.push(FileContent {
                path: rel.clone(),
                content,
            }),
            Err(reason) => {
                warn!("Skipping file '{}': {}", rel, reason);
            }
        }
    }

    debug!(
        "Read {} of {} requested files under {:?}",
        contents.len(),
        relative_paths.len(),
        base
    );
    contents
}

fn read_one(base: &Path, relative_path: &str) -> Result<String, String> {
    let full_path = safe_join(base, relative_path)?;

    let metadata = fs::metadata(&full_path).map_err(|e| e.to_string())?;
    if !metadata.is_file() {
        return Err("not a regular file".to_string());
    }

    let bytes = fs::read(&full_path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())
}

/// Join `relative_path` under `base`, rejecting absolute paths and any
/// `..` that would climb above the base.
fn safe_join(base: &Path, relative_path: &str) -> Result<PathBuf, String> {
    let mut components: Vec<&str> = Vec::new();
    for component in relative_path.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => {
                if components.pop().is_none() {
                    return Err("path escapes base directory".to_string());
                }
            }
            c => components.push(c),
        }
    }
    if Path::new(relative_path).is_absolute() {
        return Err("absolute path not allowed".to_string());
    }

    let mut full = base.to_path_buf();
    for component in components {
        full.push(component);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_read_tolerance() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one.txt"), "first").unwrap();
        fs::write(temp.path().join("two.txt"), "second").unwrap();

        let requested = vec![
            "one.txt".to_string(),
            "missing.txt".to_string(),
            "two.txt".to_string(),
        ];
        let result = read_many(temp.path(), &requested);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].path, "one.txt");
        assert_eq!(result[0].content, "first");
        assert_eq!(result[1].path, "two.txt");
        assert_eq!(result[1].content, "second");
    }

    #[test]
    fn test_directories_are_omitted() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/file.txt"), "nested").unwrap();

        let requested = vec!["sub".to_string(), "sub/file.txt".to_string()];
        let result = read_many(temp.path(), &requested);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, "sub/file.txt");
        assert_eq!(result[0].content, "nested");
    }

    #[test]
    fn test_non_utf8_is_omitted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("bin.dat"), [0xff, 0xfe, 0x00]).unwrap();
        fs::write(temp.path().join("ok.txt"), "text").unwrap();

        let requested = vec!["bin.dat".to_string(), "ok.txt".to_string()];
        let result = read_many(temp.path(), &requested);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, "ok.txt");
    }

    #[test]
    fn test_escaping_paths_are_omitted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("inside.txt"), "in").unwrap();

        let requested = vec![
            "../outside.txt".to_string(),
            "/etc/hostname".to_string(),
            "sub/../inside.txt".to_string(),
        ];
        let result = read_many(temp.path(), &requested);

        // The normalized in-base path survives, escapes do not.
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, "sub/../inside.txt");
        assert_eq!(result[0].content, "in");
    }

    #[test]
    fn test_empty_request() {
        let temp = TempDir::new().unwrap();
        assert!(read_many(temp.path(), &[]).is_empty());
    }
}
