//! Builds the folder tree of the bill root and renders it as ASCII.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One directory below the scanned root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub path: PathBuf,
    /// Bill files directly inside this directory.
    pub file_count: usize,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Bill files in this directory and everything below it.
    pub fn total_files(&self) -> usize {
        self.file_count + self.children.iter().map(TreeNode::total_files).sum::<usize>()
    }
}

/// A utility struct for building and rendering directory trees.
///
/// This struct is stateless and provides methods as associated functions.
pub struct TreeGenerator;

impl TreeGenerator {
    /// Builds a nested tree from a flat list of directories below `root`.
    ///
    /// `file_counts` maps a directory to the number of bills directly inside
    /// it; directories missing from the map count zero.
    pub fn build_tree(
        root: &Path,
        directories: &[PathBuf],
        file_counts: &HashMap<PathBuf, usize>,
    ) -> Vec<TreeNode> {
        let mut children_of: HashMap<&Path, Vec<&PathBuf>> = HashMap::new();
        for dir in directories {
            if let Some(parent) = dir.parent() {
                children_of.entry(parent).or_default().push(dir);
            }
        }
        Self::build_level(root, &children_of, file_counts)
    }

    fn build_level(
        parent: &Path,
        children_of: &HashMap<&Path, Vec<&PathBuf>>,
        file_counts: &HashMap<PathBuf, usize>,
    ) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = children_of
            .get(parent)
            .map(|children| {
                children
                    .iter()
                    .map(|dir| TreeNode {
                        name: dir
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        path: dir.to_path_buf(),
                        file_count: file_counts.get(dir.as_path()).copied().unwrap_or(0),
                        children: Self::build_level(dir, children_of, file_counts),
                    })
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    /// Renders the tree as ASCII, one directory per line with its bill count.
    pub fn render(root: &Path, nodes: &[TreeNode]) -> String {
        let mut result = String::new();
        result.push_str(&format!(
            "{}/\n",
            root.file_name().unwrap_or_default().to_string_lossy()
        ));
        Self::render_children(nodes, &mut result, "");
        result
    }

    fn render_children(nodes: &[TreeNode], result: &mut String, prefix: &str) {
        for (i, node) in nodes.iter().enumerate() {
            let is_last = i == nodes.len() - 1;
            let connector = if is_last { "└── " } else { "├── " };

            result.push_str(&format!(
                "{prefix}{connector}{} ({})\n",
                node.name,
                node.total_files()
            ));

            if !node.children.is_empty() {
                let new_prefix = if is_last {
                    format!("{prefix}    ")
                } else {
                    format!("{prefix}│   ")
                };
                Self::render_children(&node.children, result, &new_prefix);
            }
        }
    }
}
