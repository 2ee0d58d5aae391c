//! Merkle-tree change detection.
//!
//! Every sync rebuilds a full hash tree of the directory: file nodes carry the
//! content hash, directory nodes hash the lexicographically sorted multiset of
//! their children's hashes, so two directories with the same files hash
//! identically regardless of OS iteration order. The stored tree is replaced
//! wholesale (delete-all then insert-all) after comparison.
//!
//! There is no root-hash short-circuit: every sync pays the full rebuild.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::models::{SyncReport, SyncStrategyKind, TrackedDirectory};
use crate::scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
        }
    }
}

/// One node in the in-memory arena. Parent/child links are indices, never
/// pointers; a rebuild clears the arena and repopulates it.
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub kind: NodeKind,
    pub relative_path: String,
    pub node_hash: String,
    pub file_size: Option<i64>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Arena-backed hash tree for one directory root.
#[derive(Debug, Default)]
pub struct MerkleTree {
    pub nodes: Vec<MerkleNode>,
    pub root: Option<usize>,
    /// Per-file read/hash failures collected during the walk.
    pub errors: Vec<String>,
}

impl MerkleTree {
    /// Build the full tree by walking `root`. Hashes every tracked file, so
    /// this is blocking work.
    pub fn build(root: &Path, extensions: &[String]) -> Result<MerkleTree> {
        let mut tree = MerkleTree::default();
        let mut errors = Vec::new();
        tree.root = build_dir(&mut tree.nodes, root, "", None, extensions, &mut errors)?;
        tree.errors = errors;
        Ok(tree)
    }

    pub fn root_hash(&self) -> Option<&str> {
        self.root.map(|i| self.nodes[i].node_hash.as_str())
    }

    /// Relative path → hash for file nodes only.
    pub fn file_hashes(&self) -> HashMap<&str, &str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::File)
            .map(|n| (n.relative_path.as_str(), n.node_hash.as_str()))
            .collect()
    }
}

/// Hash of a directory from its children's hashes. Sorting first makes the
/// result independent of filesystem iteration order.
pub fn hash_children(child_hashes: &[String]) -> String {
    let mut sorted = child_hashes.to_vec();
    sorted.sort();
    let combined = sorted.join(",");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively build the subtree for one directory. Returns the arena index
/// of the directory node, or `None` when the subtree holds no tracked files.
fn build_dir(
    nodes: &mut Vec<MerkleNode>,
    dir: &Path,
    relative: &str,
    parent: Option<usize>,
    extensions: &[String],
    errors: &mut Vec<String>,
) -> Result<Option<usize>> {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(e) => {
            errors.push(format!("Error reading {}: {}", dir.display(), e));
            return Ok(None);
        }
    };
    entries.sort();

    // Reserve the directory node slot so children can point at it.
    let dir_index = nodes.len();
    nodes.push(MerkleNode {
        kind: NodeKind::Directory,
        relative_path: if relative.is_empty() {
            ".".to_string()
        } else {
            relative.to_string()
        },
        node_hash: String::new(),
        file_size: None,
        parent,
        children: Vec::new(),
    });

    let mut child_hashes = Vec::new();
    let mut child_indices = Vec::new();

    for entry in entries {
        let name = match entry.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let child_rel = if relative.is_empty() {
            name
        } else {
            format!("{}/{}", relative, name)
        };

        if entry.is_dir() {
            if let Some(sub) =
                build_dir(nodes, &entry, &child_rel, Some(dir_index), extensions, errors)?
            {
                child_hashes.push(nodes[sub].node_hash.clone());
                child_indices.push(sub);
            }
        } else if scan::is_image_path(&entry, extensions) {
            let (file_hash, size) =
                match (scan::compute_file_hash(&entry), scan::stat_file(&entry)) {
                    (Ok(h), Ok(s)) => (h, s.size),
                    (Err(e), _) | (_, Err(e)) => {
                        errors.push(format!("Error hashing {}: {}", entry.display(), e));
                        continue;
                    }
                };
            let idx = nodes.len();
            nodes.push(MerkleNode {
                kind: NodeKind::File,
                relative_path: child_rel,
                node_hash: file_hash,
                file_size: Some(size),
                parent: Some(dir_index),
                children: Vec::new(),
            });
            child_hashes.push(nodes[idx].node_hash.clone());
            child_indices.push(idx);
        }
    }

    if child_hashes.is_empty() {
        // Empty subtree contributes nothing; drop the reserved node if it is
        // still the last one (nested children would have kept it alive).
        if dir_index == nodes.len() - 1 {
            nodes.pop();
        }
        return Ok(None);
    }

    nodes[dir_index].node_hash = hash_children(&child_hashes);
    nodes[dir_index].children = child_indices;
    Ok(Some(dir_index))
}

pub async fn sync(
    pool: &SqlitePool,
    dir: &TrackedDirectory,
    extensions: &[String],
) -> Result<SyncReport> {
    let start = Instant::now();
    let root = dir.path.clone();

    if !root.is_dir() {
        return Ok(SyncReport::empty_with_error(
            dir.id,
            SyncStrategyKind::Merkle,
            format!("Directory does not exist: {}", root.display()),
            start.elapsed(),
        ));
    }

    let stored = load_stored_file_hashes(pool, dir.id).await?;

    let exts = extensions.to_vec();
    let build_root = root.clone();
    let tree = tokio::task::spawn_blocking(move || MerkleTree::build(&build_root, &exts)).await??;

    let current = tree.file_hashes();

    let mut added = Vec::new();
    let mut unchanged = 0usize;
    for (rel, hash) in &current {
        match stored.get(*rel) {
            Some(old) if old == hash => unchanged += 1,
            // New path or content change; merkle reports both as added
            _ => added.push(root.join(rel)),
        }
    }

    let deleted: Vec<String> = stored
        .keys()
        .filter(|rel| !current.contains_key(rel.as_str()))
        .cloned()
        .collect();

    // First sync: everything is added, unchanged stays zero.
    let (added, unchanged) = if stored.is_empty() {
        (
            current.keys().map(|rel| root.join(rel)).collect(),
            0,
        )
    } else {
        (added, unchanged)
    };

    replace_tree(pool, dir.id, &tree).await?;

    Ok(SyncReport {
        tracked_directory_id: dir.id,
        added,
        modified: Vec::new(),
        deleted,
        unchanged,
        errors: tree.errors.clone(),
        duration: start.elapsed(),
        strategy: SyncStrategyKind::Merkle,
    })
}

pub async fn cleanup(pool: &SqlitePool, tracked_directory_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM merkle_nodes WHERE tracked_directory_id = ?")
        .bind(tracked_directory_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Count of file nodes currently stored for a directory.
pub async fn tracked_count(pool: &SqlitePool, tracked_directory_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM merkle_nodes WHERE tracked_directory_id = ? AND node_type = 'file'",
    )
    .bind(tracked_directory_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

async fn load_stored_file_hashes(
    pool: &SqlitePool,
    tracked_directory_id: i64,
) -> Result<HashMap<String, String>> {
    let rows = sqlx::query(
        "SELECT relative_path, node_hash FROM merkle_nodes
         WHERE tracked_directory_id = ? AND node_type = 'file'",
    )
    .bind(tracked_directory_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("relative_path"), row.get("node_hash")))
        .collect())
}

/// Delete-all then insert-all replacement of the stored tree, parents before
/// children so `parent_id` can reference real row ids.
async fn replace_tree(pool: &SqlitePool, tracked_directory_id: i64, tree: &MerkleTree) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query("DELETE FROM merkle_nodes WHERE tracked_directory_id = ?")
        .bind(tracked_directory_id)
        .execute(&mut *tx)
        .await?;

    // Pre-order walk so every parent row exists before its children.
    let mut db_ids: HashMap<usize, i64> = HashMap::new();
    let mut stack = match tree.root {
        Some(r) => vec![r],
        None => Vec::new(),
    };

    while let Some(idx) = stack.pop() {
        let node = &tree.nodes[idx];
        let parent_db_id = node.parent.and_then(|p| db_ids.get(&p)).copied();
        let file_hash = match node.kind {
            NodeKind::File => Some(node.node_hash.as_str()),
            NodeKind::Directory => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO merkle_nodes
                (tracked_directory_id, node_hash, node_type, relative_path, parent_id, file_hash, file_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tracked_directory_id)
        .bind(&node.node_hash)
        .bind(node.kind.as_str())
        .bind(&node.relative_path)
        .bind(parent_db_id)
        .bind(file_hash)
        .bind(node.file_size)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        db_ids.insert(idx, result.last_insert_rowid());
        stack.extend(node.children.iter().copied());
    }

    tx.commit().await?;
    Ok(())
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
    fn child_hash_is_order_independent() {
        let a = vec!["aaa".to_string(), "bbb".to_string(), "ccc".to_string()];
        let b = vec!["ccc".to_string(), "aaa".to_string(), "bbb".to_string()];
        assert_eq!(hash_children(&a), hash_children(&b));
    }

    #[test]
    fn child_hash_is_content_sensitive() {
        let a = vec!["aaa".to_string(), "bbb".to_string()];
        let b = vec!["aaa".to_string(), "ddd".to_string()];
        assert_ne!(hash_children(&a), hash_children(&b));
    }

    #[test]
    fn tree_build_collects_files_and_root_hash() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        fs::write(tmp.path().join("nested/b.png"), b"b").unwrap();
        fs::write(tmp.path().join("ignored.txt"), b"x").unwrap();

        let tree = MerkleTree::build(tmp.path(), &exts()).unwrap();
        let files = tree.file_hashes();
        assert_eq!(files.len(), 2);
        assert!(files.contains_key("a.jpg"));
        assert!(files.contains_key("nested/b.png"));
        assert!(tree.root_hash().is_some());
    }

    #[test]
    fn root_hash_stable_across_rebuilds() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        fs::write(tmp.path().join("b.jpg"), b"b").unwrap();

        let h1 = MerkleTree::build(tmp.path(), &exts())
            .unwrap()
            .root_hash()
            .unwrap()
            .to_string();
        let h2 = MerkleTree::build(tmp.path(), &exts())
            .unwrap()
            .root_hash()
            .unwrap()
            .to_string();
        assert_eq!(h1, h2);
    }

    #[test]
    fn root_hash_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        let h1 = MerkleTree::build(tmp.path(), &exts())
            .unwrap()
            .root_hash()
            .unwrap()
            .to_string();

        fs::write(tmp.path().join("a.jpg"), b"changed").unwrap();
        let h2 = MerkleTree::build(tmp.path(), &exts())
            .unwrap()
            .root_hash()
            .unwrap()
            .to_string();
        assert_ne!(h1, h2);
    }

    #[test]
    fn empty_directory_has_no_root() {
        let tmp = TempDir::new().unwrap();
        let tree = MerkleTree::build(tmp.path(), &exts()).unwrap();
        assert!(tree.root.is_none());
        assert!(tree.file_hashes().is_empty());
    }
}
