//! Content fingerprints used to confirm that a call changed the filesystem.

use super::request::{suffix_matches, ExpectedOutput};
use crate::artifacts::walk_files;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// SHA-256 digests of every file an [`ExpectedOutput`] covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFingerprint {
    files: BTreeMap<PathBuf, String>,
}

impl OutputFingerprint {
    /// Hashes the files covered by `expected` under `work_dir`.
    ///
    /// Missing or unreadable files are simply absent from the fingerprint.
    pub async fn capture(work_dir: &Path, expected: &ExpectedOutput) -> Self {
        let mut files = BTreeMap::new();
        match expected {
            ExpectedOutput::Nothing => {}
            ExpectedOutput::File(rel) => {
                let path = work_dir.join(rel);
                if let Some(digest) = digest_file(&path).await {
                    files.insert(path, digest);
                }
            }
            ExpectedOutput::AnyFileIn { dir, suffixes } => {
                let root = work_dir.join(dir);
                let entries = match walk_files(&root).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                    Err(err) => {
                        debug!(dir = %root.display(), error = %err, "Could not walk output directory");
                        Vec::new()
                    }
                };
                for (rel, _) in entries {
                    let matches = rel
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| suffix_matches(name, suffixes));
                    if !matches {
                        continue;
                    }
                    let path = root.join(rel);
                    if let Some(digest) = digest_file(&path).await {
                        files.insert(path, digest);
                    }
                }
            }
        }
        Self { files }
    }

    /// Returns files that are new or whose content differs from `before`.
    #[must_use]
    pub fn changed_since(&self, before: &Self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|(path, digest)| before.files.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Returns the number of fingerprinted files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if no file was fingerprinted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Returns true if at least one covered file was created or changed.
///
/// Deleting files does not count as the expected side effect.
#[must_use]
pub fn verify_side_effect(before: &OutputFingerprint, after: &OutputFingerprint) -> bool {
    !after.changed_since(before).is_empty()
}

async fn digest_file(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Could not fingerprint file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_file_is_a_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let expected = ExpectedOutput::File("test-results.json".into());

        let before = OutputFingerprint::capture(dir.path(), &expected).await;
        assert!(before.is_empty());
        std::fs::write(dir.path().join("test-results.json"), "{}").unwrap();
        let after = OutputFingerprint::capture(dir.path(), &expected).await;

        assert!(verify_side_effect(&before, &after));
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_a_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test-report.md"), "# Report").unwrap();
        let expected = ExpectedOutput::File("test-report.md".into());

        let before = OutputFingerprint::capture(dir.path(), &expected).await;
        // Rewriting identical content does not count.
        std::fs::write(dir.path().join("test-report.md"), "# Report").unwrap();
        let after = OutputFingerprint::capture(dir.path(), &expected).await;
        assert!(!verify_side_effect(&before, &after));

        std::fs::write(dir.path().join("test-report.md"), "# Report v2").unwrap();
        let changed = OutputFingerprint::capture(dir.path(), &expected).await;
        assert!(verify_side_effect(&before, &changed));
    }

    #[tokio::test]
    async fn test_directory_fingerprint_filters_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let cases = dir.path().join("test-cases").join("auth");
        std::fs::create_dir_all(&cases).unwrap();
        let expected = ExpectedOutput::AnyFileIn {
            dir: "test-cases".into(),
            suffixes: vec![".spec.ts".into()],
        };

        let before = OutputFingerprint::capture(dir.path(), &expected).await;
        std::fs::write(cases.join("notes.txt"), "x").unwrap();
        let after_notes = OutputFingerprint::capture(dir.path(), &expected).await;
        assert!(!verify_side_effect(&before, &after_notes));

        std::fs::write(cases.join("login.spec.ts"), "test('a', () => {})").unwrap();
        let after = OutputFingerprint::capture(dir.path(), &expected).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after.changed_since(&before), vec![cases.join("login.spec.ts")]);
    }

    #[tokio::test]
    async fn test_directory_fingerprint_sees_deeply_nested_changes() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("test-cases").join("shop").join("cart");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(dir.path().join("test-cases").join("home.spec.ts"), "a").unwrap();
        let expected = ExpectedOutput::AnyFileIn {
            dir: "test-cases".into(),
            suffixes: vec![".spec.ts".into()],
        };

        let before = OutputFingerprint::capture(dir.path(), &expected).await;
        assert_eq!(before.len(), 1);
        std::fs::write(deep.join("checkout.spec.ts"), "b").unwrap();
        let after = OutputFingerprint::capture(dir.path(), &expected).await;

        assert_eq!(after.len(), 2);
        assert_eq!(after.changed_since(&before), vec![deep.join("checkout.spec.ts")]);
    }

    #[tokio::test]
    async fn test_missing_output_directory_fingerprints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let expected = ExpectedOutput::AnyFileIn {
            dir: "test-cases".into(),
            suffixes: vec![".spec.ts".into()],
        };
        assert!(OutputFingerprint::capture(dir.path(), &expected).await.is_empty());
    }
}
