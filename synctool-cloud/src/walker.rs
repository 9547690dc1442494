//! Filesystem snapshot fed to the reconciler.

use crate::config::STATE_DIR_NAME;
use crate::error::{CloudError, CloudResult};
use crate::transfer::STAGING_SUFFIX;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// A file or directory in the walked tree. Files have `children == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub path: PathBuf,
    pub name: String,
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }

    /// Paths of every file at or below this node.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match &node.children {
                Some(children) => pending.extend(children.iter()),
                None => out.push(node.path.clone()),
            }
        }
        out
    }
}

/// Result of one walk.
#[derive(Debug, Clone)]
pub struct Walk {
    pub root: TreeNode,
    /// Directories whose entries could not be listed. Their contents are
    /// unknown, not absent.
    pub unreadable: Vec<PathBuf>,
}

impl Walk {
    /// Path strings of every file found.
    pub fn live_files(&self) -> HashSet<String> {
        self.root
            .file_paths()
            .into_iter()
            .map(|p| path_string(&p))
            .collect()
    }
}

/// Whether an entry name is an engine artifact that must never be synced.
pub fn is_excluded(name: &str) -> bool {
    name == STATE_DIR_NAME || name.ends_with(STAGING_SUFFIX)
}

/// Lossy string form used as the record key.
pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Walks `root` on the blocking pool.
pub async fn walk(root: &Path) -> CloudResult<Walk> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_blocking(&root)).await?
}

/// Walks `root` depth-first with children sorted by name. Symlinks are not
/// followed and are left out of the tree.
pub fn walk_blocking(root: &Path) -> CloudResult<Walk> {
    let metadata = std::fs::metadata(root)
        .map_err(|e| CloudError::Walk(format!("cannot stat {}: {e}", root.display())))?;
    if !metadata.is_dir() {
        return Err(CloudError::Walk(format!("{} is not a directory", root.display())));
    }

    let mut stack: Vec<TreeNode> = Vec::new();
    let mut finished: Option<TreeNode> = None;
    let mut unreadable = Vec::new();

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy()));

    for result in entries {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(CloudError::Walk(format!(
                        "cannot read {}: {err}",
                        root.display()
                    )));
                }
                match err.path() {
                    Some(path) => {
                        warn!("skipping unreadable entry {}: {err}", path.display());
                        unreadable.push(path.to_path_buf());
                    }
                    None => warn!("walk error: {err}"),
                }
                continue;
            }
        };

        while stack.len() > entry.depth() {
            close_top(&mut stack, &mut finished);
        }

        let file_type = entry.file_type();
        let node = TreeNode {
            path: entry.path().to_path_buf(),
            name: entry.file_name().to_string_lossy().into_owned(),
            children: None,
        };
        if file_type.is_dir() {
            stack.push(TreeNode {
                children: Some(Vec::new()),
                ..node
            });
        } else if file_type.is_file() {
            if let Some(parent) = stack.last_mut() {
                parent.children.get_or_insert_with(Vec::new).push(node);
            }
        }
    }

    while !stack.is_empty() {
        close_top(&mut stack, &mut finished);
    }

    let root = finished
        .ok_or_else(|| CloudError::Walk(format!("{} yielded no entries", root.display())))?;
    Ok(Walk { root, unreadable })
}

fn close_top(stack: &mut Vec<TreeNode>, finished: &mut Option<TreeNode>) {
    let Some(node) = stack.pop() else {
        return;
    };
    match stack.last_mut() {
        Some(parent) => parent.children.get_or_insert_with(Vec::new).push(node),
        None => *finished = Some(node),
    }
}
