use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use super::{
    from_json_text, parse_enum, parse_timestamp, to_db_time, to_json_text, SqliteStorage,
};
use crate::error::{is_unique_violation, AppError, AppResult, ConflictError, StorageError};
use crate::graph::{
    CausalEdge, GraphSnapshot, GraphStore, HypothesisNode, HypothesisUpdate, NodeType,
};

const NODE_COLUMNS: &str = "id, engagement_id, node_type, content, confidence, status, \
     importance, testability, parent_id, metadata, created_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, engagement_id, source_id, target_id, relationship, strength, reasoning, created_at";

impl SqliteStorage {
    /// True when `id` names a hypothesis of `engagement_id`.
    pub(crate) async fn node_in_scope(&self, engagement_id: &str, id: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM hypotheses WHERE id = ? AND engagement_id = ?",
        )
        .bind(id)
        .bind(engagement_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn ensure_parent_in_scope(&self, node: &HypothesisNode) -> AppResult<()> {
        if let Some(parent_id) = &node.parent_id {
            if !self.node_in_scope(&node.engagement_id, parent_id).await? {
                return Err(AppError::not_found("hypothesis", parent_id.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for SqliteStorage {
    async fn create_node(&self, node: &HypothesisNode) -> AppResult<()> {
        node.validate()?;
        self.ensure_parent_in_scope(node).await?;

        let metadata = to_json_text(node.metadata.as_ref())?;

        let result = sqlx::query(
            r#"
            INSERT INTO hypotheses (id, engagement_id, node_type, content, confidence, status,
                                    importance, testability, parent_id, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&node.id)
        .bind(&node.engagement_id)
        .bind(node.node_type.as_str())
        .bind(&node.content)
        .bind(node.confidence)
        .bind(node.status.as_str())
        .bind(node.importance.as_str())
        .bind(node.testability.as_str())
        .bind(&node.parent_id)
        .bind(&metadata)
        .bind(to_db_time(&node.created_at))
        .bind(to_db_time(&node.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(engagement_id = %node.engagement_id, node_id = %node.id, node_type = %node.node_type, "Hypothesis created");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                let message = if node.node_type == NodeType::Thesis {
                    format!("engagement {} already has a thesis root", node.engagement_id)
                } else {
                    format!("hypothesis id {} already exists", node.id)
                };
                Err(ConflictError::Duplicate {
                    entity: "hypothesis",
                    message,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_node(&self, engagement_id: &str, id: &str) -> AppResult<HypothesisNode> {
        let row: Option<NodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM hypotheses WHERE id = ? AND engagement_id = ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .bind(engagement_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(AppError::not_found("hypothesis", id)),
        }
    }

    async fn update_node(
        &self,
        engagement_id: &str,
        id: &str,
        update: &HypothesisUpdate,
    ) -> AppResult<HypothesisNode> {
        let mut node = self.get_node(engagement_id, id).await?;
        let parent_before = node.parent_id.clone();
        update.apply(&mut node)?;
        if node.parent_id != parent_before {
            self.ensure_parent_in_scope(&node).await?;
        }

        let metadata = to_json_text(node.metadata.as_ref())?;

        let result = sqlx::query(
            r#"
            UPDATE hypotheses
            SET content = ?, confidence = ?, status = ?, importance = ?, testability = ?,
                parent_id = ?, metadata = ?, updated_at = ?
            WHERE id = ? AND engagement_id = ?
            "#,
        )
        .bind(&node.content)
        .bind(node.confidence)
        .bind(node.status.as_str())
        .bind(node.importance.as_str())
        .bind(node.testability.as_str())
        .bind(&node.parent_id)
        .bind(&metadata)
        .bind(to_db_time(&node.updated_at))
        .bind(id)
        .bind(engagement_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("hypothesis", id));
        }

        Ok(node)
    }

    async fn delete_node(&self, engagement_id: &str, id: &str) -> AppResult<()> {
        // Edges cascade; children, contradictions and evidence links get their
        // reference nulled by the schema.
        let result = sqlx::query("DELETE FROM hypotheses WHERE id = ? AND engagement_id = ?")
            .bind(id)
            .bind(engagement_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("hypothesis", id));
        }

        debug!(engagement_id = %engagement_id, node_id = %id, "Hypothesis deleted");
        Ok(())
    }

    async fn create_edge(&self, edge: &CausalEdge) -> AppResult<()> {
        edge.validate()?;

        for endpoint in [&edge.source_id, &edge.target_id] {
            if !self.node_in_scope(&edge.engagement_id, endpoint).await? {
                return Err(AppError::not_found("hypothesis", endpoint.clone()));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO causal_edges (id, engagement_id, source_id, target_id, relationship,
                                      strength, reasoning, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.engagement_id)
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(edge.relationship.as_str())
        .bind(edge.strength)
        .bind(&edge.reasoning)
        .bind(to_db_time(&edge.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_edge(&self, engagement_id: &str, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM causal_edges WHERE id = ? AND engagement_id = ?")
            .bind(id)
            .bind(engagement_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("edge", id));
        }
        Ok(())
    }

    async fn list_graph(&self, engagement_id: &str) -> AppResult<GraphSnapshot> {
        let node_rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM hypotheses WHERE engagement_id = ? ORDER BY created_at ASC, rowid ASC",
            NODE_COLUMNS
        ))
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;

        let edge_rows: Vec<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM causal_edges WHERE engagement_id = ? ORDER BY created_at ASC, rowid ASC",
            EDGE_COLUMNS
        ))
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphSnapshot {
            nodes: node_rows
                .into_iter()
                .map(HypothesisNode::try_from)
                .collect::<Result<_, _>>()?,
            edges: edge_rows
                .into_iter()
                .map(CausalEdge::try_from)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn list_edges_for_node(
        &self,
        engagement_id: &str,
        node_id: &str,
    ) -> AppResult<Vec<CausalEdge>> {
        if !self.node_in_scope(engagement_id, node_id).await? {
            return Err(AppError::not_found("hypothesis", node_id));
        }

        let rows: Vec<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM causal_edges WHERE engagement_id = ? AND (source_id = ? OR target_id = ?) \
             ORDER BY created_at ASC, rowid ASC",
            EDGE_COLUMNS
        ))
        .bind(engagement_id)
        .bind(node_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(CausalEdge::try_from)
            .collect::<Result<_, _>>()?)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    engagement_id: String,
    node_type: String,
    content: String,
    confidence: f64,
    status: String,
    importance: String,
    testability: String,
    parent_id: Option<String>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<NodeRow> for HypothesisNode {
    type Error = StorageError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            node_type: parse_enum("node_type", &row.node_type)?,
            content: row.content,
            confidence: row.confidence,
            status: parse_enum("status", &row.status)?,
            importance: parse_enum("importance", &row.importance)?,
            testability: parse_enum("testability", &row.testability)?,
            parent_id: row.parent_id,
            metadata: from_json_text(row.metadata),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EdgeRow {
    id: String,
    engagement_id: String,
    source_id: String,
    target_id: String,
    relationship: String,
    strength: f64,
    reasoning: Option<String>,
    created_at: String,
}

impl TryFrom<EdgeRow> for CausalEdge {
    type Error = StorageError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            source_id: row.source_id,
            target_id: row.target_id,
            relationship: parse_enum("relationship", &row.relationship)?,
            strength: row.strength,
            reasoning: row.reasoning,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}
