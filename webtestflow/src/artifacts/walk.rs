//! Recursive file listing for artifact directories.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lists every regular file under `root` with its size, relative to `root`,
/// in file-name order. Symlinks are not followed.
///
/// Runs on the blocking pool.
pub(crate) async fn walk_files(root: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_files_blocking(&root))
        .await
        .map_err(io::Error::other)?
}

fn walk_files_blocking(root: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata()?.len();
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .to_path_buf();
        files.push((rel, size));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_walk_lists_nested_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("auth").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.spec.ts"), "bb").unwrap();
        std::fs::write(dir.path().join("auth").join("a.spec.ts"), "a").unwrap();
        std::fs::write(nested.join("c.spec.ts"), "ccc").unwrap();

        let files = walk_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                (PathBuf::from("auth/a.spec.ts"), 1),
                (PathBuf::from("auth/deep/c.spec.ts"), 3),
                (PathBuf::from("b.spec.ts"), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_of_missing_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = walk_files(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.spec.ts"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let files = walk_files(dir.path()).await.unwrap();
        assert_eq!(files, vec![(PathBuf::from("real.spec.ts"), 1)]);
    }
}
