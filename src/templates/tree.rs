//! Materialized file trees.
//!
//! A [`FileTree`] is an ordered map of relative POSIX paths to file bytes.
//! Ordering is by path, so iteration, serialization and the content hash
//! are stable for identical content.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// One file in a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub executable: bool,
}

impl FileEntry {
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Ordered set of files keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree {
    entries: BTreeMap<String, FileEntry>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, marking scripts and shebang files executable
    pub fn insert<P: Into<String>, C: Into<Vec<u8>>>(&mut self, path: P, content: C) {
        let path = path.into();
        let content = content.into();
        let executable = is_executable(&path, &content);
        self.entries.insert(path, FileEntry { content, executable });
    }

    pub fn insert_entry<P: Into<String>>(&mut self, path: P, entry: FileEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(FileEntry::as_text)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Files whose path lies under `dir` (paths are kept unchanged)
    pub fn subtree(&self, dir: &str) -> FileTree {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        FileTree {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| path.starts_with(&prefix))
                .map(|(path, entry)| (path.clone(), entry.clone()))
                .collect(),
        }
    }

    /// SHA-256 over every path, executable bit and content, in path order
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.entries {
            hasher.update((path.len() as u64).to_be_bytes());
            hasher.update(path.as_bytes());
            hasher.update([entry.executable as u8]);
            hasher.update((entry.content.len() as u64).to_be_bytes());
            hasher.update(&entry.content);
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Write every file below `root`, creating directories as needed
    pub async fn write_to(&self, root: &Path) -> std::io::Result<()> {
        fs::create_dir_all(root).await?;

        for (relative, entry) in &self.entries {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }

            let mut file = fs::File::create(&path).await?;
            file.write_all(&entry.content).await?;
            file.flush().await?;

            #[cfg(unix)]
            if entry.executable {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
            }
        }

        tracing::debug!(root = %root.display(), files = self.len(), "Wrote file tree");
        Ok(())
    }
}

impl FromIterator<(String, Vec<u8>)> for FileTree {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        let mut tree = FileTree::new();
        for (path, content) in iter {
            tree.insert(path, content);
        }
        tree
    }
}

fn is_executable(path: &str, content: &[u8]) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name == "gradlew"
        || file_name == "mvnw"
        || file_name.ends_with(".sh")
        || content.starts_with(b"#!")
}

fn encode_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn decode_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FileTree {
        let mut tree = FileTree::new();
        tree.insert("README.md", "# billing-svc");
        tree.insert(".github/workflows/ci.yml", "name: ci");
        tree.insert(".github/workflows/deploy.yml", "name: deploy");
        tree.insert("gradlew", "#!/bin/sh\nexec java");
        tree
    }

    #[test]
    fn test_executable_detection() {
        let tree = sample();
        assert!(tree.get("gradlew").unwrap().executable);
        assert!(!tree.get("README.md").unwrap().executable);

        let mut tree = FileTree::new();
        tree.insert("scripts/run.sh", "echo");
        tree.insert("bin/start", "#!/usr/bin/env python3");
        assert!(tree.get("scripts/run.sh").unwrap().executable);
        assert!(tree.get("bin/start").unwrap().executable);
    }

    #[test]
    fn test_iteration_is_path_ordered() {
        let tree = sample();
        let paths: Vec<_> = tree.paths().collect();
        assert_eq!(
            paths,
            vec![
                ".github/workflows/ci.yml",
                ".github/workflows/deploy.yml",
                "README.md",
                "gradlew"
            ]
        );
    }

    #[test]
    fn test_subtree_keeps_full_paths() {
        let tree = sample();
        let workflows = tree.subtree(".github/workflows/");
        assert_eq!(workflows.len(), 2);
        assert!(workflows.contains(".github/workflows/ci.yml"));
        assert!(!workflows.contains("README.md"));
        assert!(tree.subtree(".github/work").is_empty());
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = sample();
        let b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
        assert!(a.content_hash().starts_with("sha256:"));

        let mut c = sample();
        c.insert("README.md", "# changed");
        assert_ne!(a.content_hash(), c.content_hash());

        // Moving bytes between path and content must change the hash
        let mut d = FileTree::new();
        d.insert("ab", "c");
        let mut e = FileTree::new();
        e.insert("a", "bc");
        assert_ne!(d.content_hash(), e.content_hash());
    }

    #[test]
    fn test_serde_preserves_tree() {
        let tree = sample();
        let json = serde_json::to_string(&tree).unwrap();
        let back: FileTree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, back);
        assert_eq!(tree.content_hash(), back.content_hash());
    }

    #[tokio::test]
    async fn test_write_to_disk() {
        let dir = TempDir::new().unwrap();
        let tree = sample();

        tree.write_to(dir.path()).await.unwrap();

        let ci = std::fs::read_to_string(dir.path().join(".github/workflows/ci.yml")).unwrap();
        assert_eq!(ci, "name: ci");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("gradlew"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
