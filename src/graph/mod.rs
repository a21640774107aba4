//! Hypothesis graph: thesis nodes, causal edges, and the read-time tree projection.
//!
//! The graph is stored as an arena of [`HypothesisNode`]s plus a flat list of
//! [`CausalEdge`]s. Edges form a general DAG (cycles are tolerated at write time);
//! [`GraphSnapshot::project_tree`] derives a display tree without touching the
//! underlying edges.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::macros::text_enum;

/// Role a hypothesis plays in the thesis graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The single conceptual root of an engagement.
    Thesis,
    /// A value-creation lever the thesis relies on.
    Lever,
    /// An assumption that must hold.
    #[default]
    Assumption,
    /// A risk to the thesis.
    Risk,
    /// An external dependency.
    Dependency,
}

text_enum!(NodeType, "node type", {
    Thesis => "thesis",
    Lever => "lever",
    Assumption => "assumption",
    Risk => "risk",
    Dependency => "dependency",
});

/// Validation status of a hypothesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    #[default]
    Proposed,
    Testing,
    Validated,
    Invalidated,
    Deferred,
}

text_enum!(HypothesisStatus, "hypothesis status", {
    Proposed => "proposed",
    Testing => "testing",
    Validated => "validated",
    Invalidated => "invalidated",
    Deferred => "deferred",
});

/// How much the thesis depends on a hypothesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

text_enum!(Importance, "importance", {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

/// How hard a hypothesis is to verify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Testability {
    Easy,
    #[default]
    Moderate,
    Difficult,
}

text_enum!(Testability, "testability", {
    Easy => "easy",
    Moderate => "moderate",
    Difficult => "difficult",
});

/// Typed relationship carried by a causal edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    #[default]
    Supports,
    Contradicts,
    DependsOn,
    LeadsTo,
    Mitigates,
}

text_enum!(Relationship, "relationship", {
    Supports => "supports",
    Contradicts => "contradicts",
    DependsOn => "depends_on",
    LeadsTo => "leads_to",
    Mitigates => "mitigates",
});

/// A claim in the thesis graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisNode {
    /// Unique node identifier.
    pub id: String,
    /// Owning engagement.
    pub engagement_id: String,
    /// Role in the graph.
    pub node_type: NodeType,
    /// Claim text.
    pub content: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Validation status.
    pub status: HypothesisStatus,
    /// Importance to the thesis.
    pub importance: Importance,
    /// Ease of verification.
    pub testability: Testability,
    /// Declared display parent.
    pub parent_id: Option<String>,
    /// Free-form metadata.
    pub metadata: Option<serde_json::Value>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl HypothesisNode {
    /// Create a new proposed hypothesis with default profile.
    pub fn new(
        engagement_id: impl Into<String>,
        node_type: NodeType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            node_type,
            content: content.into(),
            confidence: 0.5,
            status: HypothesisStatus::Proposed,
            importance: Importance::Medium,
            testability: Testability::Moderate,
            parent_id: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the confidence level
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: HypothesisStatus) -> Self {
        self.status = status;
        self
    }

    /// Set importance
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Set testability
    pub fn with_testability(mut self, testability: Testability) -> Self {
        self.testability = testability;
        self
    }

    /// Set the declared parent
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check field ranges before persisting.
    pub fn validate(&self) -> AppResult<()> {
        if self.content.trim().is_empty() {
            return Err(AppError::validation("content", "Content cannot be empty"));
        }
        validate_unit("confidence", self.confidence)?;
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(AppError::validation("parent_id", "A node cannot be its own parent"));
        }
        Ok(())
    }
}

/// Partial update applied by [`GraphStore::update_node`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HypothesisUpdate {
    pub content: Option<String>,
    pub confidence: Option<f64>,
    pub status: Option<HypothesisStatus>,
    pub importance: Option<Importance>,
    pub testability: Option<Testability>,
    /// `Some(None)` clears the parent.
    pub parent_id: Option<Option<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl HypothesisUpdate {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn status(mut self, status: HypothesisStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn testability(mut self, testability: Testability) -> Self {
        self.testability = Some(testability);
        self
    }

    pub fn parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Apply onto an existing node, validating the result.
    pub fn apply(&self, node: &mut HypothesisNode) -> AppResult<()> {
        if let Some(content) = &self.content {
            node.content = content.clone();
        }
        if let Some(confidence) = self.confidence {
            node.confidence = confidence;
        }
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(importance) = self.importance {
            node.importance = importance;
        }
        if let Some(testability) = self.testability {
            node.testability = testability;
        }
        if let Some(parent_id) = &self.parent_id {
            node.parent_id = parent_id.clone();
        }
        if let Some(metadata) = &self.metadata {
            node.metadata = Some(metadata.clone());
        }
        node.updated_at = Utc::now();
        node.validate()
    }
}

/// Typed, weighted, directed relationship between two hypotheses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEdge {
    /// Unique edge identifier.
    pub id: String,
    /// Owning engagement.
    pub engagement_id: String,
    /// Source hypothesis.
    pub source_id: String,
    /// Target hypothesis.
    pub target_id: String,
    /// Relationship type.
    pub relationship: Relationship,
    /// Strength in [0, 1].
    pub strength: f64,
    /// Optional explanation.
    pub reasoning: Option<String>,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

impl CausalEdge {
    /// Create a new edge with default strength
    pub fn new(
        engagement_id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship,
            strength: 0.5,
            reasoning: None,
            created_at: Utc::now(),
        }
    }

    /// Set strength
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Set reasoning
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Check field ranges before persisting.
    pub fn validate(&self) -> AppResult<()> {
        validate_unit("strength", self.strength)
    }
}

/// Reject values outside [0, 1] (including NaN).
pub(crate) fn validate_unit(field: &str, value: f64) -> AppResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AppError::validation(
            field,
            format!("must be within [0, 1], got {}", value),
        ))
    }
}

/// All nodes and edges of one engagement, ordered by creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<HypothesisNode>,
    pub edges: Vec<CausalEdge>,
}

/// Deepest level of a projected tree; deeper nodes start a tree of their own.
pub const MAX_TREE_DEPTH: usize = 128;

/// A node of the display tree derived from a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub node: HypothesisNode,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Total number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

impl GraphSnapshot {
    /// The thesis node, if one exists.
    pub fn root(&self) -> Option<&HypothesisNode> {
        self.nodes.iter().find(|n| n.node_type == NodeType::Thesis)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&HypothesisNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `node_id`.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CausalEdge> + 'a {
        self.edges.iter().filter(move |e| e.source_id == node_id)
    }

    /// Edges entering `node_id`.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CausalEdge> + 'a {
        self.edges.iter().filter(move |e| e.target_id == node_id)
    }

    /// Derive a display forest.
    ///
    /// A node's display parent is its declared `parent_id` when that node is in the
    /// snapshot, otherwise the source of its earliest in-edge. Every node appears
    /// exactly once; cycles are broken at the first revisit. The thesis root, when
    /// present, comes first. No tree is deeper than [`MAX_TREE_DEPTH`]; a node
    /// below that level is re-rooted as a later tree of the forest.
    pub fn project_tree(&self) -> Vec<TreeNode> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut has_parent = vec![false; self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            let parent = node
                .parent_id
                .as_deref()
                .and_then(|p| index.get(p).copied())
                .filter(|&p| p != i)
                .or_else(|| {
                    self.incoming(&node.id)
                        .filter_map(|e| index.get(e.source_id.as_str()).copied())
                        .find(|&p| p != i)
                });

            if let Some(p) = parent {
                children[p].push(i);
                has_parent[i] = true;
            }
        }

        let mut start_order: Vec<usize> = (0..self.nodes.len()).filter(|&i| !has_parent[i]).collect();
        start_order.sort_by_key(|&i| self.nodes[i].node_type != NodeType::Thesis);
        // Nodes only reachable through a cycle get a turn after the real roots.
        start_order.extend((0..self.nodes.len()).filter(|&i| has_parent[i]));

        let mut pending: VecDeque<usize> = start_order.into();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut forest = Vec::new();
        while let Some(i) = pending.pop_front() {
            if !visited.contains(&i) {
                forest.push(self.build_subtree(i, 1, &children, &mut visited, &mut pending));
            }
        }
        forest
    }

    fn build_subtree(
        &self,
        i: usize,
        depth: usize,
        children: &[Vec<usize>],
        visited: &mut HashSet<usize>,
        pending: &mut VecDeque<usize>,
    ) -> TreeNode {
        visited.insert(i);
        let mut kids = Vec::new();
        for &c in &children[i] {
            if visited.contains(&c) {
                continue;
            }
            if depth >= MAX_TREE_DEPTH {
                pending.push_back(c);
            } else {
                kids.push(self.build_subtree(c, depth + 1, children, visited, pending));
            }
        }
        TreeNode {
            node: self.nodes[i].clone(),
            children: kids,
        }
    }
}

/// Persistence for hypothesis nodes and causal edges.
///
/// Every lookup is scoped by engagement; an id that exists under another
/// engagement is reported as `NotFound`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist a new node. Fails with `Conflict` for a second thesis root.
    async fn create_node(&self, node: &HypothesisNode) -> AppResult<()>;
    /// Fetch a single node.
    async fn get_node(&self, engagement_id: &str, id: &str) -> AppResult<HypothesisNode>;
    /// Apply a partial update and return the stored result.
    async fn update_node(
        &self,
        engagement_id: &str,
        id: &str,
        update: &HypothesisUpdate,
    ) -> AppResult<HypothesisNode>;
    /// Delete a node and its edges. Evidence links survive; contradiction references are nulled.
    async fn delete_node(&self, engagement_id: &str, id: &str) -> AppResult<()>;
    /// Persist a new edge between two nodes of the same engagement.
    async fn create_edge(&self, edge: &CausalEdge) -> AppResult<()>;
    /// Delete an edge.
    async fn delete_edge(&self, engagement_id: &str, id: &str) -> AppResult<()>;
    /// All nodes and edges of an engagement.
    async fn list_graph(&self, engagement_id: &str) -> AppResult<GraphSnapshot>;
    /// In- and out-edges of one node.
    async fn list_edges_for_node(
        &self,
        engagement_id: &str,
        node_id: &str,
    ) -> AppResult<Vec<CausalEdge>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(engagement: &str, node_type: NodeType, content: &str) -> HypothesisNode {
        HypothesisNode::new(engagement, node_type, content)
    }

    #[test]
    fn test_node_defaults() {
        let n = node("e1", NodeType::Lever, "Pricing power");
        assert!(!n.id.is_empty());
        assert_eq!(n.confidence, 0.5);
        assert_eq!(n.status, HypothesisStatus::Proposed);
        assert_eq!(n.importance, Importance::Medium);
        assert_eq!(n.testability, Testability::Moderate);
        assert!(n.parent_id.is_none());
    }

    #[test]
    fn test_node_validate_confidence_range() {
        let mut n = node("e1", NodeType::Risk, "Churn");
        n.confidence = 1.5;
        let err = n.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "confidence"));

        n.confidence = f64::NAN;
        assert!(n.validate().is_err());
    }

    #[test]
    fn test_node_validate_empty_content() {
        let n = node("e1", NodeType::Risk, "   ");
        assert!(n.validate().is_err());
    }

    #[test]
    fn test_update_apply_clears_parent() {
        let mut n = node("e1", NodeType::Lever, "x").with_parent("p1");
        HypothesisUpdate::default()
            .parent(None)
            .status(HypothesisStatus::Testing)
            .apply(&mut n)
            .unwrap();
        assert!(n.parent_id.is_none());
        assert_eq!(n.status, HypothesisStatus::Testing);
    }

    #[test]
    fn test_update_apply_rejects_bad_confidence() {
        let mut n = node("e1", NodeType::Lever, "x");
        assert!(HypothesisUpdate::default()
            .confidence(-0.1)
            .apply(&mut n)
            .is_err());
    }

    #[test]
    fn test_relationship_round_trip_strings() {
        for r in Relationship::ALL {
            assert_eq!(r.as_str().parse::<Relationship>().unwrap(), *r);
        }
        assert!("sideways".parse::<Relationship>().is_err());
        assert_eq!(
            serde_json::to_string(&Relationship::DependsOn).unwrap(),
            "\"depends_on\""
        );
    }

    #[test]
    fn test_project_tree_uses_declared_parent() {
        let thesis = node("e1", NodeType::Thesis, "Thesis");
        let lever = node("e1", NodeType::Lever, "Lever").with_parent(&thesis.id);
        let risk = node("e1", NodeType::Risk, "Risk").with_parent(&lever.id);
        let snapshot = GraphSnapshot {
            nodes: vec![thesis.clone(), lever.clone(), risk.clone()],
            edges: vec![],
        };

        let forest = snapshot.project_tree();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].node.id, thesis.id);
        assert_eq!(forest[0].children[0].node.id, lever.id);
        assert_eq!(forest[0].children[0].children[0].node.id, risk.id);
    }

    #[test]
    fn test_project_tree_falls_back_to_first_in_edge() {
        let thesis = node("e1", NodeType::Thesis, "Thesis");
        let a = node("e1", NodeType::Assumption, "A");
        let b = node("e1", NodeType::Assumption, "B");
        let edges = vec![
            CausalEdge::new("e1", &thesis.id, &a.id, Relationship::LeadsTo),
            CausalEdge::new("e1", &a.id, &b.id, Relationship::Supports),
            CausalEdge::new("e1", &thesis.id, &b.id, Relationship::Supports),
        ];
        let snapshot = GraphSnapshot {
            nodes: vec![thesis.clone(), a.clone(), b.clone()],
            edges,
        };

        let forest = snapshot.project_tree();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), 3);
        // b's first in-edge comes from a
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].children[0].node.id, b.id);
    }

    #[test]
    fn test_project_tree_survives_cycles() {
        let a = node("e1", NodeType::Assumption, "A");
        let b = node("e1", NodeType::Assumption, "B");
        let c = node("e1", NodeType::Assumption, "C");
        let edges = vec![
            CausalEdge::new("e1", &a.id, &b.id, Relationship::LeadsTo),
            CausalEdge::new("e1", &b.id, &c.id, Relationship::LeadsTo),
            CausalEdge::new("e1", &c.id, &a.id, Relationship::LeadsTo),
        ];
        let snapshot = GraphSnapshot {
            nodes: vec![a, b, c],
            edges: edges.clone(),
        };

        let forest = snapshot.project_tree();
        let total: usize = forest.iter().map(TreeNode::size).sum();
        assert_eq!(total, 3);
        // projection never alters the edge list
        assert_eq!(snapshot.edges, edges);
    }

    fn depth(tree: &TreeNode) -> usize {
        1 + tree.children.iter().map(depth).max().unwrap_or(0)
    }

    #[test]
    fn test_project_tree_caps_depth_of_long_chains() {
        let mut nodes = vec![node("e1", NodeType::Thesis, "Thesis")];
        for i in 1..(2 * MAX_TREE_DEPTH + 10) {
            let parent = nodes[i - 1].id.clone();
            nodes.push(node("e1", NodeType::Assumption, &format!("Step {}", i)).with_parent(parent));
        }
        let snapshot = GraphSnapshot {
            nodes: nodes.clone(),
            edges: vec![],
        };

        let forest = snapshot.project_tree();
        assert_eq!(forest.len(), 3);
        assert_eq!(forest[0].node.id, nodes[0].id);
        assert!(forest.iter().all(|t| depth(t) <= MAX_TREE_DEPTH));
        assert_eq!(depth(&forest[0]), MAX_TREE_DEPTH);
        // The first node below the cap heads the next tree.
        assert_eq!(forest[1].node.id, nodes[MAX_TREE_DEPTH].id);
        let total: usize = forest.iter().map(TreeNode::size).sum();
        assert_eq!(total, nodes.len());
    }

    #[test]
    fn test_project_tree_thesis_first() {
        let orphan = node("e1", NodeType::Risk, "Orphan");
        let thesis = node("e1", NodeType::Thesis, "Thesis");
        let snapshot = GraphSnapshot {
            nodes: vec![orphan, thesis.clone()],
            edges: vec![],
        };
        let forest = snapshot.project_tree();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].node.id, thesis.id);
    }
}
