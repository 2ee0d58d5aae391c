//! Filesystem scanning and content hashing.
//!
//! The walk is extension-filtered and recursive; hashing is streaming SHA-256.
//! Both are blocking and are expected to run on `spawn_blocking` when called
//! from async contexts.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Does the path's extension mark it as an image we track?
pub fn is_image_path(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            extensions.iter().any(|x| x == &lower)
        })
        .unwrap_or(false)
}

/// Recursively collect image files under `root`, sorted for deterministic order.
pub fn scan_images(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Not a directory: {}", root.display());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            // Unreadable subtrees are skipped, not fatal
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if is_image_path(entry.path(), extensions) {
            paths.push(entry.path().to_path_buf());
        }
    }

    paths.sort();
    Ok(paths)
}

/// Streaming SHA-256 of a file's contents, hex-encoded.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Size and mtime for the snapshot strategy's cheap pre-hash comparison.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: i64,
    /// Seconds since epoch, fractional.
    pub mtime: f64,
}

pub fn stat_file(path: &Path) -> Result<FileStat> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    Ok(FileStat {
        size: meta.len() as i64,
        mtime,
    })
}

/// Relative path of `path` under `root`, with forward slashes.
pub fn relative_to(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let s = rel.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["jpg".to_string(), "png".to_string()]
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_image_path(Path::new("a/b.JPG"), &exts()));
        assert!(is_image_path(Path::new("a/b.png"), &exts()));
        assert!(!is_image_path(Path::new("a/b.txt"), &exts()));
        assert!(!is_image_path(Path::new("a/noext"), &exts()));
    }

    #[test]
    fn scan_finds_nested_files_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("b.jpg"), b"b").unwrap();
        fs::write(tmp.path().join("sub/a.png"), b"a").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let found = scan_images(tmp.path(), &exts()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("b.jpg"));
        assert!(found[1].ends_with("sub/a.png"));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let tmp = TempDir::new().unwrap();
        let p1 = tmp.path().join("x.jpg");
        let p2 = tmp.path().join("y.jpg");
        fs::write(&p1, b"same bytes").unwrap();
        fs::write(&p2, b"same bytes").unwrap();

        let h1 = compute_file_hash(&p1).unwrap();
        let h2 = compute_file_hash(&p2).unwrap();
        assert_eq!(h1, h2);

        fs::write(&p2, b"different").unwrap();
        assert_ne!(h1, compute_file_hash(&p2).unwrap());
    }
}
