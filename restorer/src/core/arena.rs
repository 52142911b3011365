//! Execution tree of image variants, stored as an append-only arena.
//!
//! Every node records one image and the `(parent, subtask, tool)` invocation
//! that produced it. Nodes never change identity once created; mutation is
//! limited to filling in `best_tool` per child subtask and the lazily
//! computed `best_descendant`. Path reconstruction walks explicit parent
//! links, independent of any storage layout.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::types::{Severity, Subtask, ToolName};

/// Stable identifier of a node within one [`Tree`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The edge from a node's parent: which invocation produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentEdge {
    pub parent: NodeId,
    pub subtask: Subtask,
    pub tool: ToolName,
}

/// Children of one node grouped under the subtask that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskChildren {
    /// Winning tool for this subtask, filled in once decided.
    pub best_tool: Option<ToolName>,
    /// One child per tool tried.
    pub tools: BTreeMap<ToolName, NodeId>,
}

/// One image variant in the execution tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// `None` only for the root, which wraps the original input image.
    pub parent: Option<ParentEdge>,
    /// Location of this variant's image.
    pub image: PathBuf,
    /// Judged severity of the producing subtask's degradation on this image.
    /// `None` for the root and in single-shot (reflection off) mode.
    pub severity: Option<Severity>,
    /// Tournament-selected best image reachable from here, cached lazily.
    pub best_descendant: Option<NodeId>,
    pub children: BTreeMap<Subtask, SubtaskChildren>,
}

/// Violation of the tree's append-only contract. Always indicates a defect in
/// the search logic, never a transient condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    DuplicateChild {
        parent: NodeId,
        subtask: Subtask,
        tool: ToolName,
    },
    BestToolRetarget {
        node: NodeId,
        subtask: Subtask,
        current: ToolName,
        requested: ToolName,
    },
    BestDescendantRetarget {
        node: NodeId,
        current: NodeId,
        requested: NodeId,
    },
    UnknownTool {
        node: NodeId,
        subtask: Subtask,
        tool: ToolName,
    },
}

impl fmt::Display for TreeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeViolation::DuplicateChild {
                parent,
                subtask,
                tool,
            } => write!(
                f,
                "node {parent} already has a child for ({subtask}, {tool})"
            ),
            TreeViolation::BestToolRetarget {
                node,
                subtask,
                current,
                requested,
            } => write!(
                f,
                "node {node} best_tool for {subtask} already set to '{current}', refusing '{requested}'"
            ),
            TreeViolation::BestDescendantRetarget {
                node,
                current,
                requested,
            } => write!(
                f,
                "node {node} best_descendant already set to {current}, refusing {requested}"
            ),
            TreeViolation::UnknownTool {
                node,
                subtask,
                tool,
            } => write!(f, "node {node} has no child for ({subtask}, {tool})"),
        }
    }
}

impl std::error::Error for TreeViolation {}

/// Append-only arena of [`Node`]s. The root always has id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree whose root wraps the original input image.
    pub fn new(root_image: PathBuf) -> Self {
        Self {
            nodes: vec![Node {
                id: NodeId(0),
                parent: None,
                image: root_image,
                severity: None,
                best_descendant: None,
                children: BTreeMap::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record the node produced by invoking `tool` for `subtask` on `parent`.
    ///
    /// Fails if a child already exists for that triple: each invocation
    /// happens at most once per `(node, subtask, tool)`.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        subtask: Subtask,
        tool: &str,
        image: PathBuf,
        severity: Option<Severity>,
    ) -> Result<NodeId, TreeViolation> {
        let id = NodeId(self.nodes.len() as u32);
        let slot = self.nodes[parent.0 as usize]
            .children
            .entry(subtask)
            .or_default();
        if slot.tools.contains_key(tool) {
            return Err(TreeViolation::DuplicateChild {
                parent,
                subtask,
                tool: tool.to_string(),
            });
        }
        slot.tools.insert(tool.to_string(), id);
        self.nodes.push(Node {
            id,
            parent: Some(ParentEdge {
                parent,
                subtask,
                tool: tool.to_string(),
            }),
            image,
            severity,
            best_descendant: None,
            children: BTreeMap::new(),
        });
        Ok(id)
    }

    /// Record the winning tool for `subtask` under `node`.
    ///
    /// No-op if already set to the same tool; any other retarget is a
    /// search-logic defect.
    pub fn set_best_tool(
        &mut self,
        node: NodeId,
        subtask: Subtask,
        tool: &str,
    ) -> Result<(), TreeViolation> {
        let slot = self.nodes[node.0 as usize]
            .children
            .get_mut(&subtask)
            .filter(|slot| slot.tools.contains_key(tool))
            .ok_or_else(|| TreeViolation::UnknownTool {
                node,
                subtask,
                tool: tool.to_string(),
            })?;
        match &slot.best_tool {
            Some(current) if current == tool => Ok(()),
            Some(current) => {
                let violation = TreeViolation::BestToolRetarget {
                    node,
                    subtask,
                    current: current.clone(),
                    requested: tool.to_string(),
                };
                debug_assert!(false, "{violation}");
                Err(violation)
            }
            None => {
                slot.best_tool = Some(tool.to_string());
                Ok(())
            }
        }
    }

    /// Cache the tournament-selected best descendant of `node`.
    ///
    /// No-op if already set to the same target; retargeting is a defect.
    pub fn set_best_descendant(
        &mut self,
        node: NodeId,
        descendant: NodeId,
    ) -> Result<(), TreeViolation> {
        match self.nodes[node.0 as usize].best_descendant {
            Some(current) if current == descendant => Ok(()),
            Some(current) => {
                let violation = TreeViolation::BestDescendantRetarget {
                    node,
                    current,
                    requested: descendant,
                };
                debug_assert!(false, "{violation}");
                Err(violation)
            }
            None => {
                self.nodes[node.0 as usize].best_descendant = Some(descendant);
                Ok(())
            }
        }
    }

    /// Reconstruct the `(subtask, tool)` decisions from the root to `node`
    /// by walking parent links.
    pub fn path_to(&self, node: NodeId) -> Vec<(Subtask, ToolName)> {
        let mut path = Vec::new();
        let mut current = node;
        while let Some(edge) = &self.node(current).parent {
            path.push((edge.subtask, edge.tool.clone()));
            current = edge.parent;
        }
        path.reverse();
        path
    }

    /// Subtasks already completed on the path from the root to `node`.
    pub fn done_subtasks(&self, node: NodeId) -> Vec<Subtask> {
        self.path_to(node)
            .into_iter()
            .map(|(subtask, _)| subtask)
            .collect()
    }

    /// Human-readable label showing the execution path, for logs.
    pub fn label(&self, node: NodeId) -> String {
        let path = self.path_to(node);
        if path.is_empty() {
            return "input".to_string();
        }
        path.iter()
            .map(|(subtask, tool)| format!("{subtask}@{tool}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tree() -> Tree {
        Tree::new(PathBuf::from("input.png"))
    }

    #[test]
    fn create_child_links_parent_and_path() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree
            .create_child(
                root,
                Subtask::Denoising,
                "dncnn",
                PathBuf::from("a.png"),
                Some(Severity::Low),
            )
            .expect("child");
        let b = tree
            .create_child(
                a,
                Subtask::Dehazing,
                "dehamer",
                PathBuf::from("b.png"),
                Some(Severity::VeryLow),
            )
            .expect("grandchild");

        assert_eq!(
            tree.path_to(b),
            vec![
                (Subtask::Denoising, "dncnn".to_string()),
                (Subtask::Dehazing, "dehamer".to_string()),
            ]
        );
        assert_eq!(tree.done_subtasks(b), vec![Subtask::Denoising, Subtask::Dehazing]);
        assert_eq!(tree.label(b), "denoising@dncnn-dehazing@dehamer");
        assert_eq!(tree.label(root), "input");
    }

    /// Ids are minted from the arena length, so they stay dense and
    /// sequential across sibling inserts.
    #[test]
    fn child_ids_mint_sequentially() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree
            .create_child(root, Subtask::Denoising, "dncnn", PathBuf::from("a.png"), None)
            .expect("a");
        let b = tree
            .create_child(root, Subtask::Denoising, "restormer", PathBuf::from("b.png"), None)
            .expect("b");
        assert_eq!(a, NodeId(1));
        assert_eq!(b, NodeId(2));
        assert_eq!(tree.node(b).id, b);
    }

    /// Creating the same (parent, subtask, tool) child twice must fail,
    /// never mint a second distinct node.
    #[test]
    fn create_child_rejects_duplicate_triple() {
        let mut tree = tree();
        let root = tree.root();
        tree.create_child(root, Subtask::Denoising, "dncnn", PathBuf::from("a.png"), None)
            .expect("first");
        let err = tree
            .create_child(root, Subtask::Denoising, "dncnn", PathBuf::from("b.png"), None)
            .expect_err("duplicate");
        assert!(matches!(err, TreeViolation::DuplicateChild { .. }));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn set_best_tool_is_idempotent_but_never_retargets() {
        let mut tree = tree();
        let root = tree.root();
        tree.create_child(root, Subtask::Denoising, "dncnn", PathBuf::from("a.png"), None)
            .expect("a");
        tree.create_child(root, Subtask::Denoising, "restormer", PathBuf::from("b.png"), None)
            .expect("b");

        tree.set_best_tool(root, Subtask::Denoising, "dncnn").expect("set");
        tree.set_best_tool(root, Subtask::Denoising, "dncnn").expect("idempotent");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tree.set_best_tool(root, Subtask::Denoising, "restormer")
        }));
        // Debug builds assert; release builds report the violation.
        match result {
            Ok(outcome) => assert!(matches!(
                outcome,
                Err(TreeViolation::BestToolRetarget { .. })
            )),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn set_best_tool_requires_existing_child() {
        let mut tree = tree();
        let root = tree.root();
        let err = tree
            .set_best_tool(root, Subtask::Denoising, "ghost")
            .expect_err("unknown tool");
        assert!(matches!(err, TreeViolation::UnknownTool { .. }));
    }

    #[test]
    fn set_best_descendant_is_idempotent_but_never_retargets() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree
            .create_child(root, Subtask::Denoising, "dncnn", PathBuf::from("a.png"), None)
            .expect("a");
        let b = tree
            .create_child(root, Subtask::Denoising, "restormer", PathBuf::from("b.png"), None)
            .expect("b");

        tree.set_best_descendant(root, a).expect("set");
        tree.set_best_descendant(root, a).expect("idempotent");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tree.set_best_descendant(root, b)
        }));
        match result {
            Ok(outcome) => assert!(matches!(
                outcome,
                Err(TreeViolation::BestDescendantRetarget { .. })
            )),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn serde_round_trips_the_arena() {
        let mut tree = tree();
        let root = tree.root();
        tree.create_child(
            root,
            Subtask::Deraining,
            "restormer",
            PathBuf::from("a.png"),
            Some(Severity::Medium),
        )
        .expect("child");

        let json = serde_json::to_string(&tree).expect("serialize");
        let loaded: Tree = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(loaded, tree);
    }
}
